//! S3-compatible object storage backend (AWS S3, R2, MinIO).

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use serde::Deserialize;

use super::error::StorageError;
use super::traits::{Blob, BlobStore};
use crate::ImageId;

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone, Deserialize)]
pub struct S3Settings {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint, required for non-AWS providers.
    #[serde(default)]
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    /// Key prefix under which image blobs live. Default: "images".
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_region() -> String {
    "auto".into()
}
fn default_prefix() -> String {
    "images".into()
}

pub struct S3BlobStore {
    bucket: Box<Bucket>,
    prefix: String,
    max_size: u64,
}

impl S3BlobStore {
    pub fn new(settings: &S3Settings, max_size: u64) -> Result<Self, StorageError> {
        let region = match &settings.endpoint {
            Some(endpoint) => Region::Custom {
                region: settings.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => settings
                .region
                .parse()
                .map_err(|e| StorageError::Backend(format!("invalid region: {e}")))?,
        };

        let credentials = Credentials::new(
            Some(&settings.access_key),
            Some(&settings.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Backend(format!("invalid credentials: {e}")))?;

        let bucket = Bucket::new(&settings.bucket, region, credentials)
            .map_err(backend_error)?
            .with_path_style();

        Ok(Self {
            bucket,
            prefix: settings.prefix.trim_matches('/').to_string(),
            max_size,
        })
    }

    fn object_key(&self, id: &ImageId) -> String {
        format!("{}/{}", self.prefix, id)
    }
}

fn backend_error(err: S3Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, id: &ImageId, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        if data.len() as u64 > self.max_size {
            return Err(StorageError::SizeLimitExceeded {
                actual: data.len() as u64,
                limit: self.max_size,
            });
        }

        let response = self
            .bucket
            .put_object_with_content_type(self.object_key(id), data, content_type)
            .await
            .map_err(backend_error)?;

        if !is_success(response.status_code()) {
            return Err(StorageError::Backend(format!(
                "put returned status {}",
                response.status_code()
            )));
        }
        Ok(())
    }

    async fn get(&self, id: &ImageId) -> Result<Option<Blob>, StorageError> {
        let response = match self.bucket.get_object(self.object_key(id)).await {
            Ok(response) => response,
            Err(S3Error::HttpFailWithBody(404, _)) => return Ok(None),
            Err(e) => return Err(backend_error(e)),
        };

        match response.status_code() {
            404 => Ok(None),
            status if is_success(status) => {
                let content_type = response
                    .headers()
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
                    .map(|(_, value)| value.clone())
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                Ok(Some(Blob {
                    bytes: response.bytes().to_vec(),
                    content_type,
                }))
            }
            status => Err(StorageError::Backend(format!(
                "get returned status {status}"
            ))),
        }
    }

    async fn delete(&self, id: &ImageId) -> Result<bool, StorageError> {
        let response = self
            .bucket
            .delete_object(self.object_key(id))
            .await
            .map_err(backend_error)?;

        match response.status_code() {
            404 => Ok(false),
            status if is_success(status) => Ok(true),
            status => Err(StorageError::Backend(format!(
                "delete returned status {status}"
            ))),
        }
    }
}
