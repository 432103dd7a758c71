//! Data structures for manifest download runs.

use crate::error::DownloadError;
use std::path::PathBuf;
use std::time::Duration;

/// Browser-like user agent sent with every request. Some image servers reject
/// the default client identifiers.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Configuration for downloading the images of a manifest.
///
/// # Example
///
/// ```
/// use iiifsync::DownloadConfig;
/// use std::time::Duration;
///
/// let config = DownloadConfig {
///     output_dir: "scans".into(),
///     max_attempts: 5,
///     retry_delay: Duration::from_secs(10),
///     ..DownloadConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Directory the numbered image files are written to (default: `"."`).
    pub output_dir: PathBuf,
    /// Attempts per image, including the first one (default: 3).
    pub max_attempts: u32,
    /// Fixed wait between two attempts at the same image (default: 5s).
    pub retry_delay: Duration,
    /// Lower bound of the randomized wait after each successful download (default: 1s).
    pub pacing_min: Duration,
    /// Upper bound of the randomized wait after each successful download (default: 3s).
    pub pacing_max: Duration,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
    /// Additional headers sent with every request, as `(name, value)` pairs.
    pub extra_headers: Vec<(String, String)>,
    /// Draw a progress bar on stderr (default: false).
    pub show_progress: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            pacing_min: Duration::from_secs(1),
            pacing_max: Duration::from_secs(3),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            extra_headers: Vec::new(),
            show_progress: false,
        }
    }
}

impl DownloadConfig {
    /// Rejects settings the download loop cannot honor.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.max_attempts == 0 {
            return Err(DownloadError::InvalidInput(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.pacing_min > self.pacing_max {
            return Err(DownloadError::InvalidInput(format!(
                "pacing range is empty: min {} > max {}",
                humantime::format_duration(self.pacing_min),
                humantime::format_duration(self.pacing_max)
            )));
        }
        Ok(())
    }
}

/// One image of the manifest, mapped to where it is fetched from and stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    /// 1-based position in manifest order.
    pub index: usize,
    /// Image service identifier as found in the manifest.
    pub source_id: String,
    /// Full-resolution image URL derived from `source_id`.
    pub url: String,
    /// Destination path, e.g. `scans/007.jpg`.
    pub path: PathBuf,
}

impl DownloadTarget {
    /// File name without the directory, for log and progress messages.
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.source_id)
    }
}

/// Terminal state of one target after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Fetched, verified and written.
    Downloaded { bytes: u64 },
    /// The destination file already existed; nothing was fetched.
    Skipped,
    /// All attempts failed; the destination is left absent.
    Failed { reason: String },
}

/// A target whose download permanently failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub index: usize,
    pub file_name: String,
    pub reason: String,
}

/// What a run did, item by item in aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of images listed in the manifest.
    pub total: usize,
    pub downloaded: usize,
    pub skipped: usize,
    /// Permanently failed items in manifest order.
    pub failed: Vec<FailedItem>,
    /// The run stopped early because it was cancelled.
    pub cancelled: bool,
}

impl RunSummary {
    /// True when every image is now present on disk.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failed.is_empty()
    }

    pub(crate) fn record(&mut self, target: &DownloadTarget, outcome: &TransferOutcome) {
        match outcome {
            TransferOutcome::Downloaded { .. } => self.downloaded += 1,
            TransferOutcome::Skipped => self.skipped += 1,
            TransferOutcome::Failed { reason } => self.failed.push(FailedItem {
                index: target.index,
                file_name: target.file_name().to_string(),
                reason: reason.clone(),
            }),
        }
    }
}
