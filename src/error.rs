//! Error types for manifest and image download operations.

use std::io;
use thiserror::Error;

/// Errors that can occur while resolving a manifest or downloading its images.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// I/O error during file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// HTTP request error (connection failure, truncated body, ...).
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("GET {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// The server declared a length that the received body does not match.
    #[error("Expected to download {expected} bytes from {url} but received {actual} bytes")]
    Integrity {
        url: String,
        expected: u64,
        actual: u64,
    },

    /// The manifest could not be fetched, parsed or walked.
    #[error("Invalid manifest {url}: {reason}")]
    InvalidManifest { url: String, reason: String },

    /// Bad invocation input, detected before any network activity.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The run was cancelled.
    #[error("Download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Whether another attempt at the same transfer could succeed.
    ///
    /// Network failures and integrity mismatches are retried identically;
    /// everything else is final for the item it happened on.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DownloadError::ReqwestError(_)
                | DownloadError::HttpStatus { .. }
                | DownloadError::Integrity { .. }
        )
    }
}
