//! Ingest of images by source URL.
//!
//! A new image is written to the blob store first and the metadata store
//! second. When the metadata insert fails the blob is deleted again on a
//! best-effort basis; an orphaned blob is the worst case.

use std::sync::Arc;

use common::ImageId;
use common::storage::{BlobStore, ContentHash, StorageError};
use reqwest::Url;
use tracing::{error, info, instrument, warn};

use super::fetch::{FetchError, SourceFetcher};
use crate::config::IngestConfig;
use crate::store::{ImageStore, NewImage, StoreError};
use crate::utils::source_url::SourcePolicy;

/// What ingest is allowed to accept.
#[derive(Debug, Clone)]
pub struct IngestPolicy {
    pub source: SourcePolicy,
    pub max_bytes: u64,
    pub allowed_content_types: Vec<String>,
}

impl IngestPolicy {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            source: SourcePolicy::new(&config.allowed_schemes, &config.denied_hosts),
            max_bytes: config.max_image_bytes,
            allowed_content_types: config
                .allowed_content_types
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Declared type if it is specific, otherwise a guess from the path extension.
    fn resolve_content_type(&self, url: &Url, declared: Option<&str>) -> Result<String, IngestError> {
        let content_type = match declared {
            Some(declared) if declared != "application/octet-stream" => declared.to_string(),
            _ => mime_guess::from_path(url.path())
                .first_raw()
                .map(str::to_string)
                .ok_or_else(|| {
                    IngestError::Validation("source did not declare an image content type".into())
                })?,
        };

        if !self.allowed_content_types.contains(&content_type) {
            return Err(IngestError::Validation(format!(
                "content type '{content_type}' is not allowed"
            )));
        }
        Ok(content_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A blob and a metadata row were written for a new image.
    Created(ImageId),
    /// The source URL was already ingested; nothing was written.
    Existing(ImageId),
}

impl IngestOutcome {
    pub fn id(&self) -> ImageId {
        match self {
            Self::Created(id) | Self::Existing(id) => *id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("{0}")]
    Validation(String),
    #[error("fetching source failed: {0}")]
    UpstreamFetchFailed(String),
    #[error("storage unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

pub struct IngestCoordinator {
    blobs: Arc<dyn BlobStore>,
    images: Arc<dyn ImageStore>,
    fetcher: Arc<dyn SourceFetcher>,
    policy: IngestPolicy,
}

impl IngestCoordinator {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        images: Arc<dyn ImageStore>,
        fetcher: Arc<dyn SourceFetcher>,
        policy: IngestPolicy,
    ) -> Self {
        Self {
            blobs,
            images,
            fetcher,
            policy,
        }
    }

    #[instrument(skip(self))]
    pub async fn ingest(&self, raw_url: &str) -> Result<IngestOutcome, IngestError> {
        let url = self
            .policy
            .source
            .parse(raw_url)
            .map_err(|e| IngestError::Validation(e.to_string()))?;
        let source_url = url.to_string();

        if let Some(existing) = self.images.find_by_source_url(&source_url).await? {
            info!(image_id = %existing.id, "Source already ingested");
            return Ok(IngestOutcome::Existing(existing.id));
        }

        let fetched = self
            .fetcher
            .fetch(&url, self.policy.max_bytes)
            .await
            .map_err(|e| match e {
                FetchError::TooLarge { limit } => {
                    IngestError::Validation(format!("image exceeds {limit} bytes"))
                }
                other => IngestError::UpstreamFetchFailed(other.to_string()),
            })?;

        let content_type = self
            .policy
            .resolve_content_type(&url, fetched.content_type.as_deref())?;
        let bytes = fetched.bytes;
        if bytes.is_empty() {
            return Err(IngestError::Validation("source returned an empty body".into()));
        }
        if bytes.len() as u64 > self.policy.max_bytes {
            return Err(IngestError::Validation(format!(
                "image exceeds {} bytes",
                self.policy.max_bytes
            )));
        }

        let id = ImageId::generate();
        self.blobs
            .put(&id, &bytes, &content_type)
            .await
            .map_err(|e| match e {
                StorageError::SizeLimitExceeded { limit, .. } => {
                    IngestError::Validation(format!("image exceeds {limit} bytes"))
                }
                other => IngestError::StoreUnavailable(other.to_string()),
            })?;

        let record = NewImage {
            id,
            source_url: source_url.clone(),
            content_type,
            size: bytes.len() as i64,
            content_hash: ContentHash::compute(&bytes).to_hex(),
        };

        match self.images.insert(record).await {
            Ok(()) => {
                info!(image_id = %id, size = bytes.len(), "Ingested image");
                Ok(IngestOutcome::Created(id))
            }
            Err(e) => {
                warn!(image_id = %id, error = %e, "Metadata insert failed after blob write");
                self.compensate(&id).await;

                // A concurrent ingest of the same URL won the unique constraint.
                if matches!(e, StoreError::Conflict(_))
                    && let Ok(Some(winner)) = self.images.find_by_source_url(&source_url).await
                {
                    return Ok(IngestOutcome::Existing(winner.id));
                }
                Err(e.into())
            }
        }
    }

    async fn compensate(&self, id: &ImageId) {
        match self.blobs.delete(id).await {
            Ok(_) => info!(image_id = %id, "Deleted blob of failed ingest"),
            Err(e) => error!(
                image_id = %id,
                error = %e,
                "Compensating blob delete failed, blob is orphaned"
            ),
        }
    }
}
