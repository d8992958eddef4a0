//! Metadata, lock, and response-cache stores behind the enrichment funnel.

pub mod cache;
pub mod image;
pub mod lock;

pub use cache::{CachedResponse, MemoryResponseCache, ResponseCache};
pub use image::{ImageRecord, ImageStore, NewImage, SeaOrmImageStore};
pub use lock::{DatabaseLockStore, LockStore, MemoryLockStore, spawn_lock_sweeper};

use sea_orm::{DbErr, SqlErr};

/// Errors from the metadata and lock stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(String),
    /// A stored row could not be mapped back into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => StoreError::Conflict(detail),
            _ => StoreError::Database(err.to_string()),
        }
    }
}
