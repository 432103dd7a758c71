//! Single-attempt HTTP transport.

use crate::error::DownloadError;
use crate::types::DownloadConfig;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use tracing::debug;

/// Body of a successful GET together with the length the server declared for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// Bytes actually received.
    pub bytes: Vec<u8>,
    /// `Content-Length` as sent by the server, if any.
    pub content_length: Option<u64>,
}

/// Performs exactly one GET request. Retrying is the caller's business.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<Fetched, DownloadError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<Fetched, DownloadError> {
        debug!("GET {}", url);
        let response = self.client.get(url).headers(headers.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_length = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let mut bytes = Vec::with_capacity(content_length.unwrap_or(0).min(64 << 20) as usize);
        let mut byte_stream = response.bytes_stream();
        while let Some(piece) = byte_stream.next().await {
            bytes.extend_from_slice(&piece?);
        }

        Ok(Fetched {
            bytes,
            content_length,
        })
    }
}

/// Builds the header set attached to every outbound request.
pub fn default_headers(config: &DownloadConfig) -> Result<HeaderMap, DownloadError> {
    let mut headers = HeaderMap::new();
    let user_agent = HeaderValue::from_str(&config.user_agent)
        .map_err(|e| DownloadError::InvalidInput(format!("invalid user agent: {}", e)))?;
    headers.insert(USER_AGENT, user_agent);

    for (name, value) in &config.extra_headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| DownloadError::InvalidInput(format!("invalid header name {:?}: {}", name, e)))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| {
            DownloadError::InvalidInput(format!("invalid value for header {}: {}", name, e))
        })?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}
