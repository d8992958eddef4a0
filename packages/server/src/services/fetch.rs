use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url, header, redirect};
use tracing::{debug, instrument};

use crate::utils::source_url::SourcePolicy;

/// Bytes downloaded from a source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    /// Declared media type without parameters, lowercased.
    pub content_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("timed out")]
    Timeout,
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

/// Downloads source images for ingest.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch `url`, failing with [`FetchError::TooLarge`] once more than
    /// `max_bytes` have been seen.
    async fn fetch(&self, url: &Url, max_bytes: u64) -> Result<FetchedImage, FetchError>;
}

/// [`SourceFetcher`] over reqwest with a hard timeout and checked redirects.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Every redirect hop is checked against `policy`, the same as the
    /// original URL.
    pub fn new(
        timeout: Duration,
        max_redirects: usize,
        policy: SourcePolicy,
    ) -> Result<Self, reqwest::Error> {
        let redirect = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= max_redirects {
                return attempt.error("too many redirects");
            }
            match policy.check(attempt.url()) {
                Ok(()) => attempt.follow(),
                Err(e) => attempt.error(e),
            }
        });

        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect)
            .build()?;
        Ok(Self { client })
    }
}

fn map_reqwest(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Request(err.to_string())
    }
}

/// `image/png; charset=binary` → `image/png`
pub fn media_type_essence(value: &str) -> Option<String> {
    let essence = value.split(';').next()?.trim().to_ascii_lowercase();
    (!essence.is_empty()).then_some(essence)
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(&self, url: &Url, max_bytes: u64) -> Result<FetchedImage, FetchError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        if let Some(len) = response.content_length()
            && len > max_bytes
        {
            return Err(FetchError::TooLarge { limit: max_bytes });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(media_type_essence);

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(map_reqwest)? {
            if (bytes.len() + chunk.len()) as u64 > max_bytes {
                return Err(FetchError::TooLarge { limit: max_bytes });
            }
            bytes.extend_from_slice(&chunk);
        }

        debug!(bytes = bytes.len(), content_type = ?content_type, "Fetched source image");
        Ok(FetchedImage {
            bytes,
            content_type,
        })
    }
}
