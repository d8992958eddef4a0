use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::InferenceConfig;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Request(String),
    #[error("inference service returned status {0}")]
    Status(u16),
    #[error("malformed inference response: {0}")]
    Malformed(String),
    #[error("inference service returned an empty description")]
    Empty,
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
}

/// Produces a free-text description of an image.
///
/// Calls are slow and metered. Callers are expected to deduplicate.
#[async_trait]
pub trait Describer: Send + Sync {
    async fn describe(&self, image: &[u8], content_type: &str) -> Result<String, InferenceError>;
}

#[derive(Serialize)]
struct DescribeRequest<'a> {
    image: &'a [u8],
    content_type: &'a str,
    prompt: &'a str,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct DescribeResponse {
    #[serde(default)]
    result: Option<DescribeResult>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct DescribeResult {
    #[serde(default)]
    description: Option<String>,
}

impl DescribeResponse {
    fn into_description(self) -> Option<String> {
        self.result
            .and_then(|r| r.description)
            .or(self.description)
    }
}

/// [`Describer`] backed by an HTTP vision model endpoint.
#[derive(Clone)]
pub struct HttpDescriber {
    client: Client,
    endpoint: String,
    api_token: Option<String>,
    prompt: String,
    max_tokens: u32,
}

impl HttpDescriber {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            client: Client::new(),
            endpoint: config.endpoint.clone(),
            api_token: config.api_token.clone(),
            prompt: config.prompt.clone(),
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
impl Describer for HttpDescriber {
    #[instrument(skip(self, image), fields(bytes = image.len()))]
    async fn describe(&self, image: &[u8], content_type: &str) -> Result<String, InferenceError> {
        let body = DescribeRequest {
            image,
            content_type,
            prompt: &self.prompt,
            max_tokens: self.max_tokens,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::Status(status.as_u16()));
        }

        let parsed: DescribeResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Malformed(e.to_string()))?;
        let description = parsed
            .into_description()
            .ok_or_else(|| InferenceError::Malformed("missing description field".into()))?;

        if description.trim().is_empty() {
            return Err(InferenceError::Empty);
        }
        Ok(description)
    }
}
