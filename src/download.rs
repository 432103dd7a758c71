//! Image download with bounded retries and atomic placement.

use crate::error::DownloadError;
use crate::transport::Transport;
use crate::types::DownloadConfig;
use crate::verify::verify_length;
use reqwest::header::HeaderMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio_retry2::strategy::FixedInterval;
use tokio_retry2::{Retry, RetryError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How many times a transfer is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Fixed wait between two attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DownloadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: config.retry_delay,
        }
    }

    /// Waits between attempts. One fewer than `max_attempts`, so the last
    /// failure is reported without waiting.
    fn strategy(&self) -> impl Iterator<Item = Duration> {
        FixedInterval::from_millis(self.delay.as_millis() as u64)
            .take(self.max_attempts.saturating_sub(1) as usize)
    }
}

/// Result of a successful download call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persisted {
    /// The verified body was written to the destination.
    Written(u64),
    /// The destination appeared while downloading; it was left untouched.
    AlreadyPresent,
}

/// Staging file for `dest`: `<name>.<random>.part` in the same directory, so
/// every writer gets its own and the publish step never crosses filesystems.
fn staging_file(dest: &Path) -> io::Result<NamedTempFile> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let prefix = format!(
        "{}.",
        dest.file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default()
    );
    tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".part")
        .tempfile_in(parent)
}

/// Downloads `url` to `dest`, retrying transient failures.
///
/// Each attempt is a GET followed by the length check. Network errors and
/// length mismatches are retried after `policy.delay` until
/// `policy.max_attempts` is spent; other errors end the item at once. Only a
/// verified body is ever written, and it reaches `dest` in one step, so `dest`
/// either holds the complete image or does not exist.
///
/// # Returns
///
/// The persisted state on success, the last attempt's error once retries are
/// exhausted, or [`DownloadError::Cancelled`] if `cancel` fires first.
pub async fn download_with_retry<T: Transport + ?Sized>(
    transport: &T,
    url: &str,
    dest: &Path,
    headers: &HeaderMap,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Persisted, DownloadError> {
    let file_display_name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(url);
    let max_attempts = policy.max_attempts;
    let mut attempt = 0u32;

    let retry = Retry::spawn(policy.strategy(), || {
        attempt += 1;
        let current = attempt;

        async move {
            match download_once(transport, url, dest, headers).await {
                Ok(persisted) => Ok(persisted),
                Err(e) if e.is_transient() => {
                    warn!(
                        "Attempt {}/{} for {} failed: {}",
                        current, max_attempts, file_display_name, e
                    );
                    RetryError::to_transient(e)
                }
                Err(e) => {
                    warn!(
                        "Attempt {}/{} for {} failed permanently: {}",
                        current, max_attempts, file_display_name, e
                    );
                    RetryError::to_permanent(e)
                }
            }
        }
    });

    tokio::select! {
        biased;

        // A write already running on the blocking pool is not stopped; it
        // either publishes a verified file or drops its staging file.
        _ = cancel.cancelled() => {
            debug!("Download of {} cancelled", file_display_name);
            Err(DownloadError::Cancelled)
        }
        result = retry => result,
    }
}

/// One attempt: fetch, verify, persist.
async fn download_once<T: Transport + ?Sized>(
    transport: &T,
    url: &str,
    dest: &Path,
    headers: &HeaderMap,
) -> Result<Persisted, DownloadError> {
    let fetched = transport.fetch(url, headers).await?;
    verify_length(url, fetched.content_length, &fetched.bytes)?;
    persist(dest.to_path_buf(), fetched.bytes).await
}

async fn persist(dest: PathBuf, bytes: Vec<u8>) -> Result<Persisted, DownloadError> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    tokio::task::spawn_blocking(move || write_and_publish(&dest, &bytes))
        .await
        .map_err(io::Error::other)?
}

/// Writes `bytes` to a fresh staging file and publishes it at `dest` without
/// clobbering anything already there. The staging file is gone afterwards
/// whatever the outcome.
fn write_and_publish(dest: &Path, bytes: &[u8]) -> Result<Persisted, DownloadError> {
    let mut staging = staging_file(dest)?;
    staging.write_all(bytes)?;
    staging.as_file().sync_all()?;

    match staging.persist_noclobber(dest) {
        Ok(_) => Ok(Persisted::Written(bytes.len() as u64)),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            debug!("{:?} appeared during download, leaving it untouched", dest);
            Ok(Persisted::AlreadyPresent)
        }
        Err(e) => Err(e.error.into()),
    }
}
