use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::services::enrichment::PENDING_DESCRIPTION;
use crate::store::ImageRecord;

/// Maximum accepted length of a description edit before sanitization.
const MAX_RAW_DESCRIPTION_BYTES: usize = 8 * 1024;

#[derive(Deserialize, ToSchema)]
pub struct IngestRequest {
    /// Absolute `http(s)` URL of the source image.
    #[schema(example = "https://example.com/a.jpg")]
    pub url: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct IngestResponse {
    #[schema(example = "9b2f4c1e-7d3a-4f5b-8c6d-0e1f2a3b4c5d")]
    pub id: String,
}

#[derive(Serialize, ToSchema)]
pub struct ImageMetadataResponse {
    pub id: String,
    pub source_url: Option<String>,
    /// `null` while enrichment has not completed.
    pub description: Option<String>,
    /// `"described"` or `"pending"`.
    #[schema(example = "pending")]
    pub status: &'static str,
    pub content_type: Option<String>,
    pub size: Option<i64>,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ImageRecord> for ImageMetadataResponse {
    fn from(record: ImageRecord) -> Self {
        let status = if record.is_described() {
            "described"
        } else {
            PENDING_DESCRIPTION
        };
        Self {
            id: record.id.to_string(),
            source_url: record.source_url,
            description: record.description,
            status,
            content_type: record.content_type,
            size: record.size,
            content_hash: record.content_hash,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateDescriptionRequest {
    #[schema(example = "A red bicycle leaning against a brick wall")]
    pub description: String,
}

impl UpdateDescriptionRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.description.trim().is_empty() {
            return Err(AppError::Validation("Description must not be empty".into()));
        }
        if self.description.len() > MAX_RAW_DESCRIPTION_BYTES {
            return Err(AppError::Validation(format!(
                "Description must be at most {MAX_RAW_DESCRIPTION_BYTES} bytes"
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct DescriptionResponse {
    pub id: String,
    /// Stored value after sanitization.
    pub description: String,
}
