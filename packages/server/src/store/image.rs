use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::ImageId;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use super::StoreError;
use crate::entity::image;

/// An image's metadata row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: ImageId,
    pub source_url: Option<String>,
    pub description: Option<String>,
    pub content_type: Option<String>,
    pub size: Option<i64>,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageRecord {
    /// `false` until the enrichment task (or an editor) has stored a description.
    pub fn is_described(&self) -> bool {
        self.description.is_some()
    }
}

impl TryFrom<image::Model> for ImageRecord {
    type Error = StoreError;

    fn try_from(model: image::Model) -> Result<Self, Self::Error> {
        let id = ImageId::from_uuid(model.id).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(Self {
            id,
            source_url: model.source_url,
            description: model.description,
            content_type: model.content_type,
            size: model.size,
            content_hash: model.content_hash,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

/// Values for a freshly ingested image. The description always starts out `NULL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImage {
    pub id: ImageId,
    pub source_url: String,
    pub content_type: String,
    pub size: i64,
    pub content_hash: String,
}

/// Image metadata persistence.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn find_by_id(&self, id: ImageId) -> Result<Option<ImageRecord>, StoreError>;

    async fn find_by_source_url(&self, url: &str) -> Result<Option<ImageRecord>, StoreError>;

    /// Insert a new row. A duplicate source URL fails with [`StoreError::Conflict`].
    async fn insert(&self, image: NewImage) -> Result<(), StoreError>;

    /// Insert-or-update the description for `id`, bumping `updated_at`.
    ///
    /// Safe to retry, and safe when no row exists yet for `id`.
    async fn upsert_description(&self, id: ImageId, description: &str) -> Result<(), StoreError>;
}

/// [`ImageStore`] over the `image` table.
#[derive(Clone)]
pub struct SeaOrmImageStore {
    db: DatabaseConnection,
}

impl SeaOrmImageStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ImageStore for SeaOrmImageStore {
    async fn find_by_id(&self, id: ImageId) -> Result<Option<ImageRecord>, StoreError> {
        image::Entity::find_by_id(id.as_uuid())
            .one(&self.db)
            .await?
            .map(ImageRecord::try_from)
            .transpose()
    }

    async fn find_by_source_url(&self, url: &str) -> Result<Option<ImageRecord>, StoreError> {
        image::Entity::find()
            .filter(image::Column::SourceUrl.eq(url))
            .one(&self.db)
            .await?
            .map(ImageRecord::try_from)
            .transpose()
    }

    async fn insert(&self, new: NewImage) -> Result<(), StoreError> {
        let now = Utc::now();
        let model = image::ActiveModel {
            id: Set(new.id.as_uuid()),
            source_url: Set(Some(new.source_url)),
            description: Set(None),
            content_type: Set(Some(new.content_type)),
            size: Set(Some(new.size)),
            content_hash: Set(Some(new.content_hash)),
            created_at: Set(now),
            updated_at: Set(now),
        };

        image::Entity::insert(model)
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn upsert_description(&self, id: ImageId, description: &str) -> Result<(), StoreError> {
        let now = Utc::now();
        let model = image::ActiveModel {
            id: Set(id.as_uuid()),
            source_url: Set(None),
            description: Set(Some(description.to_string())),
            content_type: Set(None),
            size: Set(None),
            content_hash: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        image::Entity::insert(model)
            .on_conflict(
                OnConflict::column(image::Column::Id)
                    .update_columns([image::Column::Description, image::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }
}
