use std::path::PathBuf;
use std::time::Duration;

use common::storage::s3::S3Settings;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    #[serde(default)]
    pub allow_origins: Vec<String>,
    #[serde(default = "default_cors_max_age")]
    pub max_age: u64,
}

fn default_cors_max_age() -> u64 {
    3600
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: Vec::new(),
            max_age: default_cors_max_age(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Filesystem,
    S3,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Root directory for the filesystem backend. Default: "./data/blobs".
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Required when `backend = "s3"`.
    #[serde(default)]
    pub s3: Option<S3Settings>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/blobs")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: default_data_dir(),
            s3: None,
        }
    }
}

/// Source fetch and validation limits for ingest.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Hard timeout for the remote fetch. Default: 10.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Default: 10 MiB.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
    #[serde(default = "default_allowed_schemes")]
    pub allowed_schemes: Vec<String>,
    /// Literal hostnames rejected in addition to the built-in private ranges.
    #[serde(default)]
    pub denied_hosts: Vec<String>,
}

fn default_fetch_timeout_secs() -> u64 {
    10
}
fn default_max_image_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_max_redirects() -> usize {
    5
}
fn default_allowed_content_types() -> Vec<String> {
    ["image/jpeg", "image/png", "image/gif", "image/webp", "image/avif"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_allowed_schemes() -> Vec<String> {
    vec!["https".into(), "http".into()]
}

impl IngestConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_image_bytes: default_max_image_bytes(),
            max_redirects: default_max_redirects(),
            allowed_content_types: default_allowed_content_types(),
            allowed_schemes: default_allowed_schemes(),
            denied_hosts: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    /// Per-process map. Only deduplicates within one server instance.
    #[default]
    Memory,
    /// Shared table, deduplicates across every instance using the same database.
    Database,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    /// Lifetime of the dedup lock entry. Default: 300.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    /// Default: 30.
    #[serde(default = "default_inference_timeout_secs")]
    pub inference_timeout_secs: u64,
    #[serde(default)]
    pub lock_backend: LockBackend,
    /// How often expired lock entries are purged. Default: 60.
    #[serde(default = "default_lock_sweep_interval_secs")]
    pub lock_sweep_interval_secs: u64,
}

fn default_lock_ttl_secs() -> u64 {
    300
}
fn default_inference_timeout_secs() -> u64 {
    30
}
fn default_lock_sweep_interval_secs() -> u64 {
    60
}

impl EnrichmentConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn lock_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.lock_sweep_interval_secs.max(1))
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: default_lock_ttl_secs(),
            inference_timeout_secs: default_inference_timeout_secs(),
            lock_backend: LockBackend::default(),
            lock_sweep_interval_secs: default_lock_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    /// Vision model endpoint accepting `{ image, prompt, max_tokens }`.
    pub endpoint: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_prompt() -> String {
    "Describe this image in one concise sentence suitable as alt text.".into()
}
fn default_max_tokens() -> u32 {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached responses. Default: 1024.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// Freshness of a response that carries a description. Default: one year.
    #[serde(default = "default_described_max_age_secs")]
    pub described_max_age_secs: u64,
    /// Freshness of a pending response. Default: 30.
    #[serde(default = "default_pending_max_age_secs")]
    pub pending_max_age_secs: u64,
    #[serde(default = "default_pending_swr_secs")]
    pub pending_stale_while_revalidate_secs: u64,
}

fn default_cache_capacity() -> usize {
    1024
}
fn default_described_max_age_secs() -> u64 {
    365 * 24 * 60 * 60
}
fn default_pending_max_age_secs() -> u64 {
    30
}
fn default_pending_swr_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            described_max_age_secs: default_described_max_age_secs(),
            pending_max_age_secs: default_pending_max_age_secs(),
            pending_stale_while_revalidate_secs: default_pending_swr_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    /// When set, description edits require `Authorization: Bearer <admin_token>`.
    #[serde(default)]
    pub admin_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    pub inference: InferenceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            // Load from config/config.toml
            .add_source(File::with_name("config/config").required(false))
            // Override from environment (e.g., GLIMPSE__DATABASE__URL)
            .add_source(Environment::with_prefix("GLIMPSE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
