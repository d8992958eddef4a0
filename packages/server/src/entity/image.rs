use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "image")]
pub struct Model {
    /// UUIDv4 primary key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// URL the image was ingested from. Uniqueness is enforced here, not by callers.
    #[sea_orm(unique)]
    pub source_url: Option<String>,

    /// Sanitized description. `NULL` means enrichment has not completed.
    #[sea_orm(column_type = "Text")]
    pub description: Option<String>,

    /// MIME content type of the stored blob.
    pub content_type: Option<String>,

    pub size: Option<i64>,

    /// Hex SHA-256 of the blob bytes.
    pub content_hash: Option<String>,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
