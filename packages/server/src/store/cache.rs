use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use lru::LruCache;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Snapshot of a full image response: status, headers, and body bytes.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResponse {
    /// `max-age` from the response's `Cache-Control`, or `None` when it must not be cached.
    pub fn max_age(&self) -> Option<Duration> {
        let value = self.headers.get(header::CACHE_CONTROL)?.to_str().ok()?;
        let mut max_age = None;
        for directive in value.split(',').map(str::trim) {
            if directive.eq_ignore_ascii_case("no-store") {
                return None;
            }
            if let Some(secs) = directive.strip_prefix("max-age=") {
                max_age = secs.trim().parse::<u64>().ok().map(Duration::from_secs);
            }
        }
        max_age
    }
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Store of full responses keyed by request identity.
///
/// Last write wins. Freshness comes from the `Cache-Control` directive each
/// response carries.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// A fresh response for `key`, if one is cached.
    async fn lookup(&self, key: &str) -> Option<CachedResponse>;

    /// Cache `response` under `key`, replacing any previous entry.
    async fn store(&self, key: &str, response: CachedResponse);
}

struct CacheEntry {
    response: CachedResponse,
    fresh_until: Instant,
}

/// In-process LRU [`ResponseCache`].
pub struct MemoryResponseCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryResponseCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl ResponseCache for MemoryResponseCache {
    async fn lookup(&self, key: &str) -> Option<CachedResponse> {
        let mut entries = self.entries.lock().await;
        let fresh = entries.get(key)?.fresh_until > Instant::now();
        if fresh {
            entries.get(key).map(|entry| entry.response.clone())
        } else {
            entries.pop(key);
            None
        }
    }

    async fn store(&self, key: &str, response: CachedResponse) {
        let Some(max_age) = response.max_age() else {
            return;
        };
        let entry = CacheEntry {
            fresh_until: Instant::now() + max_age,
            response,
        };
        self.entries.lock().await.put(key.to_string(), entry);
    }
}
