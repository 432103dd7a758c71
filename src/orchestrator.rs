//! Main orchestration logic for downloading the images of a manifest.

use crate::download::{download_with_retry, Persisted, RetryPolicy};
use crate::error::DownloadError;
use crate::manifest::{full_image_url, parse_manifest_url, resolve_manifest};
use crate::pacing::{PacingSource, UniformPacing};
use crate::transport::{default_headers, HttpTransport, Transport};
use crate::types::{DownloadConfig, DownloadTarget, RunSummary, TransferOutcome};
use reqwest::header::HeaderMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Width of the zero-padded file stem: one digit more than `total` has.
pub fn filename_width(total: usize) -> usize {
    total.to_string().len() + 1
}

/// File name of the `index`-th image (1-based), e.g. `007.jpg` at width 3.
pub fn target_filename(index: usize, width: usize) -> String {
    format!("{:0width$}.jpg", index, width = width)
}

/// Maps image service ids, in manifest order, to numbered download targets.
pub fn plan_targets(source_ids: &[String], output_dir: &Path) -> Vec<DownloadTarget> {
    let width = filename_width(source_ids.len());
    source_ids
        .iter()
        .enumerate()
        .map(|(i, source_id)| {
            let index = i + 1;
            DownloadTarget {
                index,
                source_id: source_id.clone(),
                url: full_image_url(source_id),
                path: output_dir.join(target_filename(index, width)),
            }
        })
        .collect()
}

/// Downloads every image of a manifest, one at a time.
///
/// Images already on disk are skipped, failed ones are retried according to
/// the configured policy and then left out, and each successful download is
/// followed by a randomized pause so the image server is not hammered.
pub struct Downloader<T: Transport = HttpTransport, P: PacingSource = UniformPacing> {
    config: DownloadConfig,
    transport: T,
    pacing: P,
    cancel: CancellationToken,
}

impl Downloader {
    /// Downloader using HTTP and uniformly random pacing.
    pub fn new(config: DownloadConfig) -> Self {
        Self::with_parts(config, HttpTransport::new(), UniformPacing)
    }
}

impl<T: Transport, P: PacingSource> Downloader<T, P> {
    pub fn with_parts(config: DownloadConfig, transport: T, pacing: P) -> Self {
        Self {
            config,
            transport,
            pacing,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `cancel` to stop the run between items, retries and pauses.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Resolves the manifest and downloads its images into `output_dir`.
    ///
    /// This performs the following steps:
    ///
    /// 1. Validates the configuration and the manifest URL
    /// 2. Fetches the manifest once and lists its images in order
    /// 3. Skips images whose numbered file already exists
    /// 4. Downloads the rest with retries, pausing after each success
    ///
    /// # Returns
    ///
    /// A [`RunSummary`] once every item has reached a final state or the run
    /// was cancelled. Per-image failures are recorded in the summary; only an
    /// invalid input or manifest is returned as an error.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use iiifsync::{DownloadConfig, Downloader};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let summary = Downloader::new(DownloadConfig::default())
    ///     .run("https://example.org/iiif/book/manifest.json")
    ///     .await?;
    /// println!("{} of {} images fetched", summary.downloaded, summary.total);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(&self, manifest_url: &str) -> Result<RunSummary, DownloadError> {
        self.config.validate()?;
        parse_manifest_url(manifest_url)?;
        let headers = default_headers(&self.config)?;

        let source_ids = resolve_manifest(&self.transport, manifest_url, &headers).await?;
        let targets = plan_targets(&source_ids, &self.config.output_dir);
        info!("Downloading {} images from {}", targets.len(), manifest_url);

        let pb = self.progress_bar(targets.len());
        let policy = RetryPolicy::from_config(&self.config);
        let mut summary = RunSummary {
            total: targets.len(),
            ..RunSummary::default()
        };

        for target in &targets {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            pb.set_message(format!("| {}", target.file_name()));

            let (outcome, fetched) = match self.download_target(target, &headers, &policy).await {
                Ok(result) => result,
                Err(DownloadError::Cancelled) => {
                    summary.cancelled = true;
                    break;
                }
                Err(e) => (
                    TransferOutcome::Failed {
                        reason: e.to_string(),
                    },
                    false,
                ),
            };

            match &outcome {
                TransferOutcome::Downloaded { bytes } => info!(
                    "Downloaded {} ({}/{}, {} bytes)",
                    target.file_name(),
                    target.index,
                    summary.total,
                    bytes
                ),
                TransferOutcome::Skipped => {
                    debug!("Skipping {}, already present", target.file_name())
                }
                TransferOutcome::Failed { reason } => error!(
                    "Giving up on {} ({}/{}): {}",
                    target.file_name(),
                    target.index,
                    summary.total,
                    reason
                ),
            }
            summary.record(target, &outcome);
            pb.inc(1);

            if fetched && !self.pause().await {
                summary.cancelled = true;
                break;
            }
        }

        if summary.cancelled {
            pb.abandon_with_message("| Cancelled");
        } else {
            pb.finish_with_message("| Done");
        }
        log_summary(&summary);
        Ok(summary)
    }

    /// Brings one target to a final state.
    ///
    /// Returns the outcome and whether a body was fetched from the network.
    /// Errors other than [`DownloadError::Cancelled`] become `Failed`.
    async fn download_target(
        &self,
        target: &DownloadTarget,
        headers: &HeaderMap,
        policy: &RetryPolicy,
    ) -> Result<(TransferOutcome, bool), DownloadError> {
        if tokio::fs::try_exists(&target.path).await.unwrap_or(false) {
            return Ok((TransferOutcome::Skipped, false));
        }

        match download_with_retry(
            &self.transport,
            &target.url,
            &target.path,
            headers,
            policy,
            &self.cancel,
        )
        .await
        {
            Ok(Persisted::Written(bytes)) => Ok((TransferOutcome::Downloaded { bytes }, true)),
            Ok(Persisted::AlreadyPresent) => Ok((TransferOutcome::Skipped, true)),
            Err(DownloadError::Cancelled) => Err(DownloadError::Cancelled),
            Err(e) => Ok((
                TransferOutcome::Failed {
                    reason: e.to_string(),
                },
                false,
            )),
        }
    }

    /// Sleeps for the next pacing delay. Returns false if cancelled meanwhile.
    async fn pause(&self) -> bool {
        let delay = self
            .pacing
            .next_delay(self.config.pacing_min, self.config.pacing_max);
        if delay.is_zero() {
            return true;
        }
        debug!("Pausing {} before next download", humantime::format_duration(delay));

        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn progress_bar(&self, total: usize) -> indicatif::ProgressBar {
        if !self.config.show_progress {
            return indicatif::ProgressBar::hidden();
        }

        let progress_bar = indicatif::ProgressBar::new(total as u64);
        if let Ok(style) = indicatif::ProgressStyle::default_bar().template(
            "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} | {elapsed_precise} elapsed, ETA {eta_precise}",
        ) {
            progress_bar.set_style(style.progress_chars("█▓▒░ "));
        }
        progress_bar
    }
}

fn log_summary(summary: &RunSummary) {
    info!(
        "{} downloaded, {} already present, {} failed of {} images",
        summary.downloaded,
        summary.skipped,
        summary.failed.len(),
        summary.total
    );
    if !summary.failed.is_empty() {
        let missing: Vec<&str> = summary.failed.iter().map(|f| f.file_name.as_str()).collect();
        warn!("Missing after this run: {}", missing.join(", "));
    }
    if summary.cancelled {
        warn!("Run was cancelled before all images were processed");
    }
}

/// Downloads every image of `manifest_url` over HTTP with random pacing.
///
/// Convenience wrapper around [`Downloader`].
pub async fn download_manifest(
    config: &DownloadConfig,
    manifest_url: &str,
    cancel: CancellationToken,
) -> Result<RunSummary, DownloadError> {
    Downloader::new(config.clone())
        .with_cancellation(cancel)
        .run(manifest_url)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::FixedPacing;
    use crate::transport::Fetched;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    const MANIFEST_URL: &str = "https://example.org/manifest.json";

    fn manifest(ids: &[String]) -> Vec<u8> {
        let images: Vec<_> = ids
            .iter()
            .map(|id| json!({ "images": [{ "resource": { "service": { "@id": id } } }] }))
            .collect();
        json!({ "sequences": [{ "canvases": images }] })
            .to_string()
            .into_bytes()
    }

    fn ids(n: usize) -> Vec<String> {
        (1..=n)
            .map(|i| format!("https://img.example.org/iiif/{}", i))
            .collect()
    }

    /// In-memory image server: serves the manifest and every image except the
    /// ones listed as broken, and counts requests per URL.
    struct FakeServer {
        manifest: Vec<u8>,
        broken: Vec<String>,
        requests: Mutex<HashMap<String, usize>>,
        cancel_on: Option<(String, CancellationToken)>,
    }

    impl FakeServer {
        fn new(ids: &[String]) -> Self {
            Self {
                manifest: manifest(ids),
                broken: Vec::new(),
                requests: Mutex::new(HashMap::new()),
                cancel_on: None,
            }
        }

        fn requests_for(&self, url: &str) -> usize {
            self.requests.lock().unwrap().get(url).copied().unwrap_or(0)
        }

        fn total_requests(&self) -> usize {
            self.requests.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl Transport for FakeServer {
        async fn fetch(&self, url: &str, _headers: &HeaderMap) -> Result<Fetched, DownloadError> {
            *self
                .requests
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_insert(0) += 1;
            if let Some((trigger, token)) = &self.cancel_on {
                if trigger == url {
                    token.cancel();
                }
            }
            if url == MANIFEST_URL {
                return Ok(Fetched {
                    bytes: self.manifest.clone(),
                    content_length: None,
                });
            }
            if self.broken.iter().any(|b| b == url) {
                return Err(DownloadError::HttpStatus {
                    url: url.to_string(),
                    status: 502,
                });
            }
            let bytes = url.as_bytes().to_vec();
            Ok(Fetched {
                content_length: Some(bytes.len() as u64),
                bytes,
            })
        }
    }

    fn test_config(dir: &Path) -> DownloadConfig {
        DownloadConfig {
            output_dir: dir.to_path_buf(),
            retry_delay: Duration::ZERO,
            ..DownloadConfig::default()
        }
    }

    #[test]
    fn test_filename_width_has_one_extra_digit() {
        assert_eq!(filename_width(1), 2);
        assert_eq!(filename_width(9), 2);
        assert_eq!(filename_width(12), 3);
        assert_eq!(filename_width(99), 3);
        assert_eq!(filename_width(100), 4);
    }

    #[test]
    fn test_target_filename() {
        assert_eq!(target_filename(1, 3), "001.jpg");
        assert_eq!(target_filename(12, 3), "012.jpg");
        assert_eq!(target_filename(7, 2), "07.jpg");
    }

    #[test]
    fn test_plan_targets_numbers_in_manifest_order() {
        let ids = ids(12);
        let targets = plan_targets(&ids, Path::new("out"));

        assert_eq!(targets.len(), 12);
        for (i, target) in targets.iter().enumerate() {
            assert_eq!(target.index, i + 1);
            assert_eq!(target.source_id, ids[i]);
            assert_eq!(target.url, format!("{}/full/full/0/default.jpg", ids[i]));
        }
        assert_eq!(targets[0].path, PathBuf::from("out/001.jpg"));
        assert_eq!(targets[11].path, PathBuf::from("out/012.jpg"));

        let names: Vec<&str> = targets.iter().map(|t| t.file_name()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[tokio::test]
    async fn test_run_downloads_all_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let ids = ids(4);
        let mut server = FakeServer::new(&ids);
        server.broken.push(full_image_url(&ids[2]));

        let downloader =
            Downloader::with_parts(test_config(dir.path()), server, FixedPacing::default());
        let summary = downloader.run(MANIFEST_URL).await.unwrap();

        assert_eq!(summary.total, 4);
        assert_eq!(summary.downloaded, 3);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].index, 3);
        assert_eq!(summary.failed[0].file_name, "03.jpg");
        assert!(!summary.cancelled);

        assert!(dir.path().join("01.jpg").exists());
        assert!(dir.path().join("02.jpg").exists());
        assert!(!dir.path().join("03.jpg").exists());
        assert!(dir.path().join("04.jpg").exists());
        assert_eq!(
            downloader.transport.requests_for(&full_image_url(&ids[2])),
            3
        );
        assert_eq!(
            std::fs::read(dir.path().join("02.jpg")).unwrap(),
            full_image_url(&ids[1]).into_bytes()
        );
    }

    #[tokio::test]
    async fn test_existing_files_are_skipped_without_requests() {
        let dir = tempfile::tempdir().unwrap();
        let ids = ids(3);
        std::fs::write(dir.path().join("02.jpg"), b"keep me").unwrap();

        let downloader =
            Downloader::with_parts(test_config(dir.path()), FakeServer::new(&ids), FixedPacing::default());
        let summary = downloader.run(MANIFEST_URL).await.unwrap();

        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(downloader.transport.requests_for(&full_image_url(&ids[1])), 0);
        assert_eq!(std::fs::read(dir.path().join("02.jpg")).unwrap(), b"keep me");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_follows_each_success_only() {
        let dir = tempfile::tempdir().unwrap();
        let ids = ids(4);
        std::fs::write(dir.path().join("01.jpg"), b"done").unwrap();
        let mut server = FakeServer::new(&ids);
        server.broken.push(full_image_url(&ids[3]));

        let downloader = Downloader::with_parts(
            test_config(dir.path()),
            server,
            FixedPacing(Duration::from_secs(2)),
        );
        let start = Instant::now();
        let summary = downloader.run(MANIFEST_URL).await.unwrap();

        // Items 2 and 3 succeed; 1 is skipped and 4 fails, neither pauses.
        assert_eq!(summary.downloaded, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    /// Records every range it is asked for and never waits.
    #[derive(Default)]
    struct RecordingPacing {
        ranges: Mutex<Vec<(Duration, Duration)>>,
    }

    impl PacingSource for RecordingPacing {
        fn next_delay(&self, min: Duration, max: Duration) -> Duration {
            self.ranges.lock().unwrap().push((min, max));
            Duration::ZERO
        }
    }

    #[tokio::test]
    async fn test_pacing_source_gets_configured_range() {
        let dir = tempfile::tempdir().unwrap();
        let ids = ids(3);
        let mut server = FakeServer::new(&ids);
        server.broken.push(full_image_url(&ids[1]));
        let config = DownloadConfig {
            pacing_min: Duration::from_millis(250),
            pacing_max: Duration::from_millis(750),
            ..test_config(dir.path())
        };

        let downloader = Downloader::with_parts(config, server, RecordingPacing::default());
        let summary = downloader.run(MANIFEST_URL).await.unwrap();

        assert_eq!(summary.downloaded, 2);
        let ranges = downloader.pacing.ranges.lock().unwrap();
        assert_eq!(
            *ranges,
            vec![(Duration::from_millis(250), Duration::from_millis(750)); 2]
        );
    }

    #[tokio::test]
    async fn test_invalid_manifest_aborts_before_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = FakeServer::new(&[]);
        server.manifest = br#"{"@context": "x", "items": []}"#.to_vec();

        let downloader =
            Downloader::with_parts(test_config(dir.path()), server, FixedPacing::default());
        let err = downloader.run(MANIFEST_URL).await.unwrap_err();

        assert!(matches!(err, DownloadError::InvalidManifest { .. }));
        assert_eq!(downloader.transport.total_requests(), 1);
    }

    #[tokio::test]
    async fn test_invalid_url_makes_no_request() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::with_parts(
            test_config(dir.path()),
            FakeServer::new(&ids(2)),
            FixedPacing::default(),
        );
        let err = downloader.run("not a url").await.unwrap_err();

        assert!(matches!(err, DownloadError::InvalidInput(_)));
        assert_eq!(downloader.transport.total_requests(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_items() {
        let dir = tempfile::tempdir().unwrap();
        let ids = ids(5);
        let cancel = CancellationToken::new();
        let mut server = FakeServer::new(&ids);
        server.cancel_on = Some((full_image_url(&ids[1]), cancel.clone()));

        let downloader =
            Downloader::with_parts(test_config(dir.path()), server, FixedPacing::default())
                .with_cancellation(cancel);
        let summary = downloader.run(MANIFEST_URL).await.unwrap();

        assert!(summary.cancelled);
        assert!(!summary.is_complete());
        assert!(dir.path().join("01.jpg").exists());
        assert!(!dir.path().join("03.jpg").exists());
        assert_eq!(downloader.transport.requests_for(&full_image_url(&ids[2])), 0);
    }
}
