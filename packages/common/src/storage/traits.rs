use async_trait::async_trait;

use super::error::StorageError;
use crate::ImageId;

/// Original image bytes together with their declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Blob storage keyed by image id.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `id`, replacing anything already there.
    async fn put(&self, id: &ImageId, data: &[u8], content_type: &str) -> Result<(), StorageError>;

    /// Retrieve a blob. `Ok(None)` means the id has no blob.
    async fn get(&self, id: &ImageId) -> Result<Option<Blob>, StorageError>;

    /// Delete a blob.
    ///
    /// Returns `true` if the blob was deleted, `false` if it did not exist.
    async fn delete(&self, id: &ImageId) -> Result<bool, StorageError>;

    /// Check whether a blob exists.
    async fn exists(&self, id: &ImageId) -> Result<bool, StorageError> {
        Ok(self.get(id).await?.is_some())
    }
}
