use std::sync::Arc;

use anyhow::Context;
use common::storage::BlobStore;
use common::storage::filesystem::FilesystemBlobStore;
use common::storage::s3::S3BlobStore;
use sea_orm::DatabaseConnection;
use tracing::info;

use crate::config::{AppConfig, LockBackend, StorageBackend};
use crate::services::{
    EnrichmentFunnel, FunnelSettings, HttpDescriber, HttpFetcher, IngestCoordinator, IngestPolicy,
};
use crate::store::{
    DatabaseLockStore, ImageStore, LockStore, MemoryLockStore, MemoryResponseCache,
    SeaOrmImageStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub images: Arc<dyn ImageStore>,
    pub locks: Arc<dyn LockStore>,
    pub funnel: Arc<EnrichmentFunnel>,
    pub ingest: Arc<IngestCoordinator>,
}

impl AppState {
    /// Wire the production backends selected by `config`.
    pub async fn initialize(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<Self> {
        let max_bytes = config.ingest.max_image_bytes;
        let blobs: Arc<dyn BlobStore> = match config.storage.backend {
            StorageBackend::Filesystem => {
                info!(path = %config.storage.data_dir.display(), "Using filesystem blob store");
                Arc::new(
                    FilesystemBlobStore::new(config.storage.data_dir.clone(), max_bytes)
                        .await
                        .context("Failed to open blob directory")?,
                )
            }
            StorageBackend::S3 => {
                let settings = config
                    .storage
                    .s3
                    .as_ref()
                    .context("storage.backend = \"s3\" requires a [storage.s3] section")?;
                info!(bucket = %settings.bucket, "Using S3 blob store");
                Arc::new(S3BlobStore::new(settings, max_bytes).context("Invalid S3 settings")?)
            }
        };

        let locks: Arc<dyn LockStore> = match config.enrichment.lock_backend {
            LockBackend::Memory => Arc::new(MemoryLockStore::new()),
            LockBackend::Database => Arc::new(DatabaseLockStore::new(db.clone())),
        };

        let images: Arc<dyn ImageStore> = Arc::new(SeaOrmImageStore::new(db));
        let cache = Arc::new(MemoryResponseCache::new(config.cache.capacity));
        let describer = Arc::new(HttpDescriber::new(&config.inference));

        let policy = IngestPolicy::from_config(&config.ingest);
        let fetcher = Arc::new(
            HttpFetcher::new(
                config.ingest.fetch_timeout(),
                config.ingest.max_redirects,
                policy.source.clone(),
            )
            .context("Failed to build HTTP client")?,
        );

        let funnel = Arc::new(EnrichmentFunnel::new(
            blobs.clone(),
            images.clone(),
            locks.clone(),
            cache,
            describer,
            FunnelSettings::from_config(&config.enrichment, &config.cache),
        ));
        let ingest = Arc::new(IngestCoordinator::new(blobs, images.clone(), fetcher, policy));

        Ok(Self {
            config: Arc::new(config),
            images,
            locks,
            funnel,
            ingest,
        })
    }
}
