//! IIIFSync - Resumable downloader for the images of a IIIF presentation manifest
//!
//! This library fetches a IIIF (v2) presentation manifest, lists the images it
//! paints on its canvases, and downloads the full-resolution rendition of each
//! one to a numbered file (`001.jpg`, `002.jpg`, ...).
//!
//! # Features
//!
//! - **Resumable Runs**: Images whose file already exists are never fetched again
//! - **Length Verification**: Bodies that do not match the declared `Content-Length` are retried
//! - **Automatic Retry**: Bounded attempts with a fixed delay for transient failures
//! - **Atomic Writes**: A file only ever appears complete and verified
//! - **Polite Pacing**: A randomized pause after each download
//! - **Failure Report**: Images that could not be fetched are listed at the end of the run
//!
//! # Example
//!
//! ```no_run
//! use iiifsync::{download_manifest, DownloadConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DownloadConfig::default();
//! let summary = download_manifest(
//!     &config,
//!     "https://example.org/iiif/book/manifest.json",
//!     CancellationToken::new(),
//! )
//! .await?;
//! assert!(summary.is_complete());
//! # Ok(())
//! # }
//! ```

mod download;
mod error;
mod manifest;
mod orchestrator;
mod pacing;
mod transport;
mod types;
mod verify;

pub use download::{download_with_retry, Persisted, RetryPolicy};
pub use error::DownloadError;
pub use manifest::{
    full_image_url, image_ids, parse_manifest, parse_manifest_url, resolve_manifest, Annotation,
    Canvas, ImageResource, ImageService, Manifest, Sequence, FULL_IMAGE_SUFFIX,
};
pub use orchestrator::{download_manifest, filename_width, plan_targets, target_filename, Downloader};
pub use pacing::{FixedPacing, PacingSource, UniformPacing};
pub use transport::{default_headers, Fetched, HttpTransport, Transport};
pub use types::{
    DownloadConfig, DownloadTarget, FailedItem, RunSummary, TransferOutcome, DEFAULT_USER_AGENT,
};
pub use verify::verify_length;
