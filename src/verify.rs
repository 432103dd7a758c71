//! Transfer integrity check (declared length against received length).

use crate::error::DownloadError;
use tracing::debug;

/// Checks that a body matches the length the server declared for it.
///
/// A missing or zero `Content-Length` skips the check: servers that do not
/// declare a length must not block downloads.
pub fn verify_length(url: &str, declared: Option<u64>, actual: &[u8]) -> Result<(), DownloadError> {
    let actual_len = actual.len() as u64;
    match declared {
        Some(expected) if expected != 0 && expected != actual_len => {
            Err(DownloadError::Integrity {
                url: url.to_string(),
                expected,
                actual: actual_len,
            })
        }
        Some(expected) if expected != 0 => Ok(()),
        _ => {
            debug!(
                "Content-Length header was not present for {}. Cannot verify size.",
                url
            );
            Ok(())
        }
    }
}
