//! Read path for images and lazy description enrichment.
//!
//! A read is answered from the response cache when possible. On a miss the
//! metadata row and the blob are loaded in parallel and the response is
//! returned at once. Cache population and, for undescribed images, the one
//! inference call happen in a detached unit tracked by the funnel.
//!
//! `description IS NULL` on the metadata row is the only "not yet enriched"
//! signal. Nothing about enrichment state is kept in process memory.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{HeaderMap, StatusCode};
use common::storage::{BlobStore, ContentHash};
use common::{ImageId, sanitize};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use super::inference::{Describer, InferenceError};
use crate::config::{CacheConfig, EnrichmentConfig};
use crate::store::{CachedResponse, ImageStore, LockStore, ResponseCache, StoreError};

/// Description header value while no description exists.
pub const PENDING_DESCRIPTION: &str = "pending";
pub const DESCRIPTION_HEADER: HeaderName = HeaderName::from_static("x-image-description");
pub const ID_HEADER: HeaderName = HeaderName::from_static("x-image-id");

const LOCK_SENTINEL: &str = "1";

/// Cache key of an image read.
pub fn cache_key(id: ImageId) -> String {
    format!("/api/v1/images/{id}")
}

fn lock_key(id: ImageId) -> String {
    format!("enrich:{id}")
}

#[derive(Debug, Clone)]
pub struct FunnelSettings {
    pub lock_ttl: Duration,
    pub inference_timeout: Duration,
    pub described_max_age: Duration,
    pub pending_max_age: Duration,
    pub pending_stale_while_revalidate: Duration,
}

impl FunnelSettings {
    pub fn from_config(enrichment: &EnrichmentConfig, cache: &CacheConfig) -> Self {
        Self {
            lock_ttl: enrichment.lock_ttl(),
            inference_timeout: enrichment.inference_timeout(),
            described_max_age: Duration::from_secs(cache.described_max_age_secs),
            pending_max_age: Duration::from_secs(cache.pending_max_age_secs),
            pending_stale_while_revalidate: Duration::from_secs(
                cache.pending_stale_while_revalidate_secs,
            ),
        }
    }

    fn cache_control(&self, described: bool) -> String {
        if described {
            format!(
                "public, max-age={}, immutable",
                self.described_max_age.as_secs()
            )
        } else {
            format!(
                "public, max-age={}, stale-while-revalidate={}",
                self.pending_max_age.as_secs(),
                self.pending_stale_while_revalidate.as_secs()
            )
        }
    }
}

impl Default for FunnelSettings {
    fn default() -> Self {
        Self::from_config(&EnrichmentConfig::default(), &CacheConfig::default())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("image {0} not found")]
    NotFound(ImageId),
    #[error("blob store unavailable: {0}")]
    StoreUnavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("description is empty after sanitization")]
    Empty,
    #[error("image {0} not found")]
    NotFound(ImageId),
    #[error("metadata store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Why a background enrichment unit stopped without writing a description.
///
/// Only ever logged.
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("enrichment already in flight or recently attempted")]
    InFlight,
    #[error("image already has a description")]
    AlreadyDescribed,
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("description is empty after sanitization")]
    EmptyDescription,
    #[error("persisting description failed: {0}")]
    Store(#[from] StoreError),
}

pub struct EnrichmentFunnel {
    blobs: Arc<dyn BlobStore>,
    images: Arc<dyn ImageStore>,
    locks: Arc<dyn LockStore>,
    cache: Arc<dyn ResponseCache>,
    describer: Arc<dyn Describer>,
    settings: FunnelSettings,
    tasks: TaskTracker,
}

impl EnrichmentFunnel {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        images: Arc<dyn ImageStore>,
        locks: Arc<dyn LockStore>,
        cache: Arc<dyn ResponseCache>,
        describer: Arc<dyn Describer>,
        settings: FunnelSettings,
    ) -> Self {
        Self {
            blobs,
            images,
            locks,
            cache,
            describer,
            settings,
            tasks: TaskTracker::new(),
        }
    }

    /// Response for a read of `id`.
    ///
    /// Only a missing or unreadable blob fails the read. Metadata errors are
    /// logged and the image is served as pending.
    #[instrument(skip(self), fields(image_id = %id))]
    pub async fn serve(self: &Arc<Self>, id: ImageId) -> Result<CachedResponse, ServeError> {
        let key = cache_key(id);
        if let Some(hit) = self.cache.lookup(&key).await {
            debug!("Response cache hit");
            return Ok(hit);
        }

        let (record, blob) = tokio::join!(self.images.find_by_id(id), self.blobs.get(&id));

        let blob = match blob {
            Ok(Some(blob)) => blob,
            Ok(None) => return Err(ServeError::NotFound(id)),
            Err(e) => {
                warn!(error = %e, "Blob read failed");
                return Err(ServeError::StoreUnavailable(e.to_string()));
            }
        };
        let description = match record {
            Ok(record) => record.and_then(|r| r.description),
            Err(e) => {
                warn!(error = %e, "Metadata lookup failed, serving as pending");
                None
            }
        };

        let response = self.build_response(
            id,
            &blob.content_type,
            Bytes::from(blob.bytes),
            description.as_deref(),
        );

        let funnel = Arc::clone(self);
        let snapshot = response.clone();
        let described = description.is_some();
        self.tasks.spawn(
            async move { funnel.after_serve(id, key, snapshot, described).await }
                .instrument(info_span!("after_serve", image_id = %id)),
        );

        Ok(response)
    }

    /// Store a human-supplied description through the same sanitizer as
    /// generated ones, and refresh a cached response if there is one.
    #[instrument(skip(self, text), fields(image_id = %id))]
    pub async fn publish_description(&self, id: ImageId, text: &str) -> Result<String, PublishError> {
        let description = sanitize(text);
        if description.is_empty() {
            return Err(PublishError::Empty);
        }

        match self.images.find_by_id(id).await {
            Ok(Some(_)) => {}
            Ok(None) => return Err(PublishError::NotFound(id)),
            Err(e) => return Err(PublishError::StoreUnavailable(e.to_string())),
        }
        self.images
            .upsert_description(id, &description)
            .await
            .map_err(|e| PublishError::StoreUnavailable(e.to_string()))?;

        let key = cache_key(id);
        if let Some(cached) = self.cache.lookup(&key).await {
            let updated = self.with_description(cached, Some(&description));
            self.cache.store(&key, updated).await;
        }

        info!("Description updated");
        Ok(description)
    }

    /// Wait for every background unit spawned so far.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    fn build_response(
        &self,
        id: ImageId,
        content_type: &str,
        body: Bytes,
        description: Option<&str>,
    ) -> CachedResponse {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type)
                .unwrap_or(HeaderValue::from_static("application/octet-stream")),
        );
        if let Ok(etag) = HeaderValue::from_str(&ContentHash::compute(&body).etag()) {
            headers.insert(header::ETAG, etag);
        }
        if let Ok(id) = HeaderValue::from_str(&id.to_string()) {
            headers.insert(ID_HEADER, id);
        }

        let response = CachedResponse {
            status: StatusCode::OK,
            headers,
            body,
        };
        self.with_description(response, description)
    }

    /// Replace the description header and pick the matching freshness.
    fn with_description(
        &self,
        mut response: CachedResponse,
        description: Option<&str>,
    ) -> CachedResponse {
        let value = description.and_then(|d| HeaderValue::from_bytes(d.as_bytes()).ok());
        let described = value.is_some();

        response.headers.insert(
            DESCRIPTION_HEADER,
            value.unwrap_or(HeaderValue::from_static(PENDING_DESCRIPTION)),
        );
        if let Ok(cache_control) = HeaderValue::from_str(&self.settings.cache_control(described)) {
            response.headers.insert(header::CACHE_CONTROL, cache_control);
        }
        response
    }

    async fn after_serve(&self, id: ImageId, key: String, response: CachedResponse, described: bool) {
        // Pending entries go in first so concurrent readers hit the cache
        // instead of starting their own unit.
        self.cache.store(&key, response.clone()).await;
        if described {
            return;
        }

        match self.enrich(id, &key, response).await {
            Ok(()) => info!("Image enriched"),
            Err(EnrichmentError::InFlight) => debug!("Enrichment skipped, lock held"),
            Err(EnrichmentError::AlreadyDescribed) => debug!("Enrichment skipped, already described"),
            Err(e) => warn!(error = %e, "Enrichment failed, image stays pending"),
        }
    }

    async fn enrich(
        &self,
        id: ImageId,
        key: &str,
        pending: CachedResponse,
    ) -> Result<(), EnrichmentError> {
        match self
            .locks
            .try_acquire(&lock_key(id), LOCK_SENTINEL, self.settings.lock_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => return Err(EnrichmentError::InFlight),
            Err(e) => warn!(error = %e, "Lock store unavailable, enriching without dedup"),
        }

        // The read that scheduled this unit may have failed on metadata.
        match self.images.find_by_id(id).await {
            Ok(Some(record)) if record.is_described() => {
                let described = self.with_description(pending, record.description.as_deref());
                self.cache.store(key, described).await;
                return Err(EnrichmentError::AlreadyDescribed);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Metadata re-check failed, enriching anyway"),
        }

        let content_type = pending
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let timeout = self.settings.inference_timeout;
        let raw = tokio::time::timeout(timeout, self.describer.describe(&pending.body, &content_type))
            .await
            .map_err(|_| InferenceError::Timeout(timeout))??;

        let description = sanitize(&raw);
        if description.is_empty() {
            return Err(EnrichmentError::EmptyDescription);
        }
        self.images.upsert_description(id, &description).await?;

        self.rebuild_cache_entry(id, key, pending).await;
        Ok(())
    }

    /// Re-derive the cached response from the stored description. Falls back
    /// to the pending response rather than leaving the key empty.
    async fn rebuild_cache_entry(&self, id: ImageId, key: &str, pending: CachedResponse) {
        let rebuilt = match self.images.find_by_id(id).await {
            Ok(Some(record)) if record.is_described() => {
                self.with_description(pending, record.description.as_deref())
            }
            Ok(_) => {
                warn!("Description missing on re-read, keeping pending entry");
                pending
            }
            Err(e) => {
                warn!(error = %e, "Re-read failed, keeping pending entry");
                pending
            }
        };
        self.cache.store(key, rebuilt).await;
    }
}
