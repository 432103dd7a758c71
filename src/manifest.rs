//! Manifest fetching and image URL derivation.

use crate::error::DownloadError;
use crate::transport::Transport;
use reqwest::header::HeaderMap;
use reqwest::Url;
use serde::Deserialize;
use tracing::info;

/// Path suffix asking an image service for the full-size, unrotated,
/// default-quality JPEG rendition.
pub const FULL_IMAGE_SUFFIX: &str = "/full/full/0/default.jpg";

/// The subset of a IIIF presentation manifest needed to list its images.
///
/// Unknown fields are ignored; missing ones make the manifest invalid.
#[derive(Deserialize, Debug, Clone)]
pub struct Manifest {
    pub sequences: Vec<Sequence>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Sequence {
    pub canvases: Vec<Canvas>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Canvas {
    pub images: Vec<Annotation>,
}

/// Image annotation painting a resource onto a canvas.
#[derive(Deserialize, Debug, Clone)]
pub struct Annotation {
    pub resource: ImageResource,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ImageResource {
    pub service: ImageService,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ImageService {
    /// Base URL of the image service.
    #[serde(rename = "@id")]
    pub id: String,
}

/// Checks that the manifest URL is an absolute HTTP(S) URL.
pub fn parse_manifest_url(manifest_url: &str) -> Result<Url, DownloadError> {
    let url = Url::parse(manifest_url).map_err(|e| {
        DownloadError::InvalidInput(format!("manifest URL {:?} is not valid: {}", manifest_url, e))
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(DownloadError::InvalidInput(format!(
            "manifest URL must use http or https, got {:?}",
            scheme
        ))),
    }
}

/// Parses a manifest document.
pub fn parse_manifest(manifest_url: &str, body: &[u8]) -> Result<Manifest, DownloadError> {
    serde_json::from_slice::<Manifest>(body).map_err(|e| DownloadError::InvalidManifest {
        url: manifest_url.to_string(),
        reason: format!(
            "{}\nExpected JSON with sequences[].canvases[].images[].resource.service.@id",
            e
        ),
    })
}

/// Lists image service ids in document order (sequences, then canvases, then images).
pub fn image_ids(manifest: &Manifest) -> Vec<String> {
    manifest
        .sequences
        .iter()
        .flat_map(|sequence| &sequence.canvases)
        .flat_map(|canvas| &canvas.images)
        .map(|image| image.resource.service.id.clone())
        .collect()
}

/// Derives the download URL of the full-resolution image for a service id.
pub fn full_image_url(service_id: &str) -> String {
    format!("{}{}", service_id, FULL_IMAGE_SUFFIX)
}

/// Downloads a manifest and returns its image service ids in order.
///
/// One attempt only: a manifest that cannot be fetched or parsed ends the run.
pub async fn resolve_manifest<T: Transport + ?Sized>(
    transport: &T,
    manifest_url: &str,
    headers: &HeaderMap,
) -> Result<Vec<String>, DownloadError> {
    info!("Retrieving manifest from {}", manifest_url);

    let fetched = transport
        .fetch(manifest_url, headers)
        .await
        .map_err(|e| DownloadError::InvalidManifest {
            url: manifest_url.to_string(),
            reason: e.to_string(),
        })?;

    let manifest = parse_manifest(manifest_url, &fetched.bytes)?;
    Ok(image_ids(&manifest))
}
