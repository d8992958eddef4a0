use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::ImageId;
use common::storage::{Blob, BlobStore, StorageError};
use reqwest::{Client, Url};
use serde_json::Value;

use server::config::{
    AppConfig, AuthConfig, CacheConfig, CorsConfig, DatabaseConfig, EnrichmentConfig,
    IngestConfig, InferenceConfig, ServerConfig, StorageConfig,
};
use server::services::{
    Describer, EnrichmentFunnel, FetchError, FetchedImage, FunnelSettings, InferenceError,
    IngestCoordinator, IngestPolicy, SourceFetcher,
};
use server::state::AppState;
use server::store::{
    ImageRecord, ImageStore, LockStore, MemoryLockStore, MemoryResponseCache, NewImage,
    StoreError,
};

pub const JPEG_BYTES: &[u8] = &[0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

pub mod routes {
    pub const IMAGES: &str = "/api/v1/images";
    pub const OPENAPI: &str = "/api-docs/openapi.json";

    pub fn image(id: &str) -> String {
        format!("/api/v1/images/{id}")
    }

    pub fn image_metadata(id: &str) -> String {
        format!("/api/v1/images/{id}/metadata")
    }

    pub fn image_description(id: &str) -> String {
        format!("/api/v1/images/{id}/description")
    }
}

/// In-memory metadata store with a unique source URL and injectable failures.
#[derive(Default)]
pub struct FakeImageStore {
    records: Mutex<HashMap<ImageId, ImageRecord>>,
    pub fail_reads: AtomicBool,
    pub fail_inserts: AtomicBool,
    pub inserts: AtomicUsize,
    pub upserts: AtomicUsize,
}

impl FakeImageStore {
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn get(&self, id: ImageId) -> Option<ImageRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    pub fn seed(&self, id: ImageId, description: Option<&str>) {
        let now = Utc::now();
        self.records.lock().unwrap().insert(
            id,
            ImageRecord {
                id,
                source_url: Some(format!("https://images.example/{id}.jpg")),
                description: description.map(String::from),
                content_type: Some("image/jpeg".into()),
                size: Some(JPEG_BYTES.len() as i64),
                content_hash: None,
                created_at: now,
                updated_at: now,
            },
        );
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Database("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageStore for FakeImageStore {
    async fn find_by_id(&self, id: ImageId) -> Result<Option<ImageRecord>, StoreError> {
        self.check_reads()?;
        Ok(self.get(id))
    }

    async fn find_by_source_url(&self, url: &str) -> Result<Option<ImageRecord>, StoreError> {
        self.check_reads()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.source_url.as_deref() == Some(url))
            .cloned())
    }

    async fn insert(&self, image: NewImage) -> Result<(), StoreError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Database("insert failed".into()));
        }

        let mut records = self.records.lock().unwrap();
        if records
            .values()
            .any(|r| r.source_url.as_deref() == Some(image.source_url.as_str()))
        {
            return Err(StoreError::Conflict("image_source_url_key".into()));
        }
        let now = Utc::now();
        records.insert(
            image.id,
            ImageRecord {
                id: image.id,
                source_url: Some(image.source_url),
                description: None,
                content_type: Some(image.content_type),
                size: Some(image.size),
                content_hash: Some(image.content_hash),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn upsert_description(&self, id: ImageId, description: &str) -> Result<(), StoreError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();
        let record = records.entry(id).or_insert_with(|| ImageRecord {
            id,
            source_url: None,
            description: None,
            content_type: None,
            size: None,
            content_hash: None,
            created_at: now,
            updated_at: now,
        });
        record.description = Some(description.to_string());
        record.updated_at = now;
        Ok(())
    }
}

/// In-memory blob store with injectable failures.
#[derive(Default)]
pub struct FakeBlobStore {
    blobs: Mutex<HashMap<ImageId, Blob>>,
    pub fail_puts: AtomicBool,
    pub fail_gets: AtomicBool,
    pub fail_deletes: AtomicBool,
    pub puts: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl FakeBlobStore {
    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn seed(&self, id: ImageId) {
        self.blobs.lock().unwrap().insert(
            id,
            Blob {
                bytes: JPEG_BYTES.to_vec(),
                content_type: "image/jpeg".into(),
            },
        );
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn put(&self, id: &ImageId, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("bucket unavailable".into()));
        }
        self.blobs.lock().unwrap().insert(
            *id,
            Blob {
                bytes: data.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, id: &ImageId) -> Result<Option<Blob>, StorageError> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("bucket unavailable".into()));
        }
        Ok(self.blobs.lock().unwrap().get(id).cloned())
    }

    async fn delete(&self, id: &ImageId) -> Result<bool, StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("bucket unavailable".into()));
        }
        Ok(self.blobs.lock().unwrap().remove(id).is_some())
    }
}

/// Describer that counts calls. `None` as the reply makes every call fail.
pub struct CountingDescriber {
    pub calls: AtomicUsize,
    reply: Mutex<Option<String>>,
    delay: Duration,
}

impl CountingDescriber {
    pub fn new(reply: Option<&str>, delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            reply: Mutex::new(reply.map(String::from)),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Describer for CountingDescriber {
    async fn describe(&self, image: &[u8], _content_type: &str) -> Result<String, InferenceError> {
        assert!(!image.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = self.reply.lock().unwrap().clone();
        reply.ok_or(InferenceError::Status(500))
    }
}

/// Lock store that is always down.
pub struct UnavailableLockStore;

#[async_trait]
impl LockStore for UnavailableLockStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Database("lock store down".into()))
    }

    async fn put(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Database("lock store down".into()))
    }
}

pub enum SourceReply {
    Image {
        bytes: Vec<u8>,
        content_type: Option<&'static str>,
    },
    Status(u16),
}

/// Source fetcher answering from a fixed URL table.
#[derive(Default)]
pub struct FakeFetcher {
    sources: Mutex<HashMap<String, SourceReply>>,
    pub calls: AtomicUsize,
    pub delay: Duration,
}

impl FakeFetcher {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn serve(&self, url: &str, reply: SourceReply) {
        self.sources.lock().unwrap().insert(url.to_string(), reply);
    }

    pub fn serve_jpeg(&self, url: &str) {
        self.serve(
            url,
            SourceReply::Image {
                bytes: JPEG_BYTES.to_vec(),
                content_type: Some("image/jpeg"),
            },
        );
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, url: &Url, max_bytes: u64) -> Result<FetchedImage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let sources = self.sources.lock().unwrap();
        match sources.get(url.as_str()) {
            Some(SourceReply::Image {
                bytes,
                content_type,
            }) => {
                if bytes.len() as u64 > max_bytes {
                    return Err(FetchError::TooLarge { limit: max_bytes });
                }
                Ok(FetchedImage {
                    bytes: bytes.clone(),
                    content_type: content_type.map(String::from),
                })
            }
            Some(SourceReply::Status(status)) => Err(FetchError::Status(*status)),
            None => Err(FetchError::Status(404)),
        }
    }
}

/// Funnel and coordinator wired over fakes.
pub struct Harness {
    pub images: Arc<FakeImageStore>,
    pub blobs: Arc<FakeBlobStore>,
    pub locks: Arc<dyn LockStore>,
    pub cache: Arc<MemoryResponseCache>,
    pub describer: Arc<CountingDescriber>,
    pub fetcher: Arc<FakeFetcher>,
    pub funnel: Arc<EnrichmentFunnel>,
    pub ingest: Arc<IngestCoordinator>,
}

pub struct HarnessBuilder {
    reply: Option<String>,
    describe_delay: Duration,
    fetch_delay: Duration,
    locks: Arc<dyn LockStore>,
    settings: FunnelSettings,
    ingest: IngestConfig,
}

impl HarnessBuilder {
    pub fn reply(mut self, reply: Option<&str>) -> Self {
        self.reply = reply.map(String::from);
        self
    }

    pub fn describe_delay(mut self, delay: Duration) -> Self {
        self.describe_delay = delay;
        self
    }

    pub fn fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn locks(mut self, locks: Arc<dyn LockStore>) -> Self {
        self.locks = locks;
        self
    }

    pub fn inference_timeout(mut self, timeout: Duration) -> Self {
        self.settings.inference_timeout = timeout;
        self
    }

    pub fn max_image_bytes(mut self, max: u64) -> Self {
        self.ingest.max_image_bytes = max;
        self
    }

    pub fn build(self) -> Harness {
        let images = Arc::new(FakeImageStore::default());
        let blobs = Arc::new(FakeBlobStore::default());
        let cache = Arc::new(MemoryResponseCache::new(64));
        let describer = Arc::new(CountingDescriber::new(
            self.reply.as_deref(),
            self.describe_delay,
        ));
        let fetcher = Arc::new(FakeFetcher::with_delay(self.fetch_delay));

        let funnel = Arc::new(EnrichmentFunnel::new(
            blobs.clone(),
            images.clone(),
            self.locks.clone(),
            cache.clone(),
            describer.clone(),
            self.settings,
        ));
        let ingest = Arc::new(IngestCoordinator::new(
            blobs.clone(),
            images.clone(),
            fetcher.clone(),
            IngestPolicy::from_config(&self.ingest),
        ));

        Harness {
            images,
            blobs,
            locks: self.locks,
            cache,
            describer,
            fetcher,
            funnel,
            ingest,
        }
    }
}

pub const DESCRIPTION: &str = "A red bicycle leaning against a brick wall.";

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            reply: Some(DESCRIPTION.to_string()),
            describe_delay: Duration::ZERO,
            fetch_delay: Duration::ZERO,
            locks: Arc::new(MemoryLockStore::new()),
            settings: FunnelSettings::default(),
            ingest: IngestConfig::default(),
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Blob plus metadata row, as left behind by a successful ingest.
    pub fn seed_image(&self, description: Option<&str>) -> ImageId {
        let id = ImageId::generate();
        self.blobs.seed(id);
        self.images.seed(id, description);
        id
    }

    /// A funnel over the same stores with an empty response cache, as after a
    /// restart.
    pub fn restarted_funnel(&self) -> Arc<EnrichmentFunnel> {
        Arc::new(EnrichmentFunnel::new(
            self.blobs.clone(),
            self.images.clone(),
            self.locks.clone(),
            Arc::new(MemoryResponseCache::new(64)),
            self.describer.clone(),
            FunnelSettings::default(),
        ))
    }
}

pub fn test_config(admin_token: Option<&str>) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors: CorsConfig::default(),
        },
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
        },
        storage: StorageConfig {
            data_dir: PathBuf::from("unused"),
            ..Default::default()
        },
        ingest: IngestConfig::default(),
        enrichment: EnrichmentConfig::default(),
        inference: InferenceConfig {
            endpoint: "http://inference.invalid/describe".to_string(),
            api_token: None,
            prompt: "Describe this image.".to_string(),
            max_tokens: 64,
        },
        cache: CacheConfig::default(),
        auth: AuthConfig {
            admin_token: admin_token.map(String::from),
        },
    }
}

/// A running test server over a [`Harness`].
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub harness: Harness,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    pub headers: reqwest::header::HeaderMap,
    pub bytes: Vec<u8>,
    /// Parsed JSON body, or `Null` if the response is not valid JSON.
    pub body: Value,
}

impl TestResponse {
    async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let headers = res.headers().clone();
        let bytes = res.bytes().await.expect("Failed to read body").to_vec();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Self {
            status,
            headers,
            bytes,
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl TestApp {
    pub async fn spawn(harness: Harness, admin_token: Option<&str>) -> Self {
        let state = AppState {
            config: Arc::new(test_config(admin_token)),
            images: harness.images.clone(),
            locks: harness.locks.clone(),
            funnel: harness.funnel.clone(),
            ingest: harness.ingest.clone(),
        };
        let app = server::build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            harness,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");
        TestResponse::from_response(res).await
    }

    pub async fn get_if_none_match(&self, path: &str, etag: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .header("If-None-Match", etag)
            .send()
            .await
            .expect("Failed to send GET request");
        TestResponse::from_response(res).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to send POST request");
        TestResponse::from_response(res).await
    }

    pub async fn put(&self, path: &str, body: &Value, token: Option<&str>) -> TestResponse {
        let mut req = self.client.put(self.url(path)).json(body);
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let res = req.send().await.expect("Failed to send PUT request");
        TestResponse::from_response(res).await
    }
}
