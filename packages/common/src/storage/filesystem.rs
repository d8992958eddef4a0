use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::error::StorageError;
use super::traits::{Blob, BlobStore};
use crate::ImageId;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Filesystem-backed blob store.
///
/// Blobs are stored in a sharded directory layout:
/// `{base_path}/{first 2 hex chars of id}/{id}` with the content type in a
/// sibling `{id}.type` file. Both are written through a temp file and renamed
/// into place, so readers never observe a partially written blob.
pub struct FilesystemBlobStore {
    base_path: PathBuf,
    max_size: u64,
}

impl FilesystemBlobStore {
    /// Create a new filesystem blob store.
    pub async fn new(base_path: PathBuf, max_size: u64) -> Result<Self, StorageError> {
        fs::create_dir_all(&base_path).await?;
        fs::create_dir_all(base_path.join(".tmp")).await?;
        Ok(Self {
            base_path,
            max_size,
        })
    }

    fn blob_path(&self, id: &ImageId) -> PathBuf {
        self.base_path.join(id.shard_prefix()).join(id.to_string())
    }

    fn type_path(&self, id: &ImageId) -> PathBuf {
        self.base_path
            .join(id.shard_prefix())
            .join(format!("{id}.type"))
    }

    /// Path for a temporary file during writes.
    fn temp_path(&self) -> PathBuf {
        self.base_path
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }

    async fn write_atomic(&self, target: &Path, data: &[u8]) -> Result<(), StorageError> {
        let temp_path = self.temp_path();
        if let Err(e) = fs::write(&temp_path, data).await {
            discard_temp(&temp_path).await;
            return Err(e.into());
        }

        if let Some(parent) = target.parent()
            && let Err(e) = fs::create_dir_all(parent).await
        {
            discard_temp(&temp_path).await;
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&temp_path, target).await {
            discard_temp(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

async fn discard_temp(path: &Path) {
    if let Err(e) = fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file");
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(&self, id: &ImageId, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        if data.len() as u64 > self.max_size {
            return Err(StorageError::SizeLimitExceeded {
                actual: data.len() as u64,
                limit: self.max_size,
            });
        }

        // Type first: a blob file without its type file reads back as octet-stream.
        self.write_atomic(&self.type_path(id), content_type.as_bytes())
            .await?;
        self.write_atomic(&self.blob_path(id), data).await
    }

    async fn get(&self, id: &ImageId) -> Result<Option<Blob>, StorageError> {
        let bytes = match fs::read(self.blob_path(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let content_type = match fs::read_to_string(self.type_path(id)).await {
            Ok(ct) if !ct.trim().is_empty() => ct.trim().to_string(),
            Ok(_) => FALLBACK_CONTENT_TYPE.to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FALLBACK_CONTENT_TYPE.to_string(),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(Blob {
            bytes,
            content_type,
        }))
    }

    async fn exists(&self, id: &ImageId) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.blob_path(id)).await?)
    }

    async fn delete(&self, id: &ImageId) -> Result<bool, StorageError> {
        let deleted = match fs::remove_file(self.blob_path(id)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        match fs::remove_file(self.type_path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(deleted)
    }
}
