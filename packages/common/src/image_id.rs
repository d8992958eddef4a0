use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque identifier of an ingested image.
///
/// Always a UUID v4. Parsing is case-insensitive; the canonical textual form
/// is the lowercase hyphenated one, which is also what cache keys and blob
/// paths are derived from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageId(Uuid);

/// Returned when a string is not a valid image id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid image id: {0}")]
pub struct InvalidImageId(pub String);

impl ImageId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID, rejecting anything that is not version 4.
    pub fn from_uuid(uuid: Uuid) -> Result<Self, InvalidImageId> {
        if uuid.get_version_num() != 4 {
            return Err(InvalidImageId(uuid.to_string()));
        }
        Ok(Self(uuid))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// First two hex characters, used to shard on-disk layouts.
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0.as_bytes()[..1])
    }
}

impl FromStr for ImageId {
    type Err = InvalidImageId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::try_parse(s.trim()).map_err(|_| InvalidImageId(s.to_string()))?;
        Self::from_uuid(uuid).map_err(|_| InvalidImageId(s.to_string()))
    }
}

impl TryFrom<String> for ImageId {
    type Error = InvalidImageId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ImageId> for String {
    fn from(id: ImageId) -> Self {
        id.to_string()
    }
}

impl From<ImageId> for Uuid {
    fn from(id: ImageId) -> Self {
        id.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageId({})", self.0.hyphenated())
    }
}
