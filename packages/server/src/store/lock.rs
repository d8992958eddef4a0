//! Ephemeral key/value entries with per-key expiry, used as a best-effort
//! dedup hint for background enrichment.
//!
//! Presence of a live entry means "someone is on it, or was recently".
//! Absence guarantees nothing. Entries are never deleted explicitly; they
//! expire.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sea_orm::sea_query::{Expr, ExprTrait, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tokio::time::Instant;
use tracing::{info, warn};

use super::StoreError;
use crate::entity::enrichment_lock;

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Value of the live entry under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write `value` under `key`, expiring after `ttl`.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Write the entry only if no live entry exists. Returns whether it was written.
    ///
    /// The default is a plain read-then-write and can let two racing callers
    /// both succeed. Backends that can do better override it.
    async fn try_acquire(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        self.put(key, value, ttl).await?;
        Ok(true)
    }

    /// Drop expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, StoreError> {
        Ok(0)
    }
}

#[derive(Debug, Clone)]
struct LockEntry {
    value: String,
    expires_at: Instant,
}

impl LockEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Per-process [`LockStore`]. Deduplicates only within this server instance.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    entries: DashMap<String, LockEntry>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            LockEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn try_acquire(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let fresh = LockEntry {
            value: value.to_string(),
            expires_at: now + ttl,
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return Ok(false);
                }
                occupied.insert(fresh);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}

/// [`LockStore`] over the `enrichment_lock` table, shared by every instance
/// pointed at the same database.
#[derive(Clone)]
pub struct DatabaseLockStore {
    db: DatabaseConnection,
}

impl DatabaseLockStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn expiry(ttl: Duration) -> chrono::DateTime<Utc> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
    }
}

#[async_trait]
impl LockStore for DatabaseLockStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entry = enrichment_lock::Entity::find_by_id(key.to_string())
            .filter(enrichment_lock::Column::ExpiresAt.gt(Utc::now()))
            .one(&self.db)
            .await?;
        Ok(entry.map(|e| e.value))
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let model = enrichment_lock::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.to_string()),
            expires_at: Set(Self::expiry(ttl)),
        };
        enrichment_lock::Entity::insert(model)
            .on_conflict(
                OnConflict::column(enrichment_lock::Column::Key)
                    .update_columns([
                        enrichment_lock::Column::Value,
                        enrichment_lock::Column::ExpiresAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn try_acquire(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let model = enrichment_lock::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.to_string()),
            expires_at: Set(Self::expiry(ttl)),
        };
        // Takes over the row only when the existing entry has expired.
        let written = enrichment_lock::Entity::insert(model)
            .on_conflict(
                OnConflict::column(enrichment_lock::Column::Key)
                    .update_columns([
                        enrichment_lock::Column::Value,
                        enrichment_lock::Column::ExpiresAt,
                    ])
                    .action_and_where(
                        Expr::col((
                            enrichment_lock::Entity,
                            enrichment_lock::Column::ExpiresAt,
                        ))
                        .lte(Utc::now()),
                    )
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(written > 0)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = enrichment_lock::Entity::delete_many()
            .filter(enrichment_lock::Column::ExpiresAt.lte(Utc::now()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}

/// Spawn a background task that periodically purges expired lock entries.
pub fn spawn_lock_sweeper(
    locks: Arc<dyn LockStore>,
    sweep_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);

        loop {
            interval.tick().await;
            match locks.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Purged expired enrichment locks"),
                Err(e) => warn!(error = %e, "Lock sweep failed"),
            }
        }
    })
}
