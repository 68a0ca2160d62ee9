//! Cache artifact records.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ArtifactId, CollectionId, FolderId, ImageId};

/// A generated derivative of one source image, stored in one cache folder.
///
/// At most one record exists per (image, profile key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheArtifact {
    pub id: ArtifactId,
    pub image_id: ImageId,
    pub collection_id: Option<CollectionId>,
    /// Key of the output profile the artifact was rendered with.
    pub profile_key: String,
    pub folder_id: FolderId,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub file_size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_valid: bool,
}

impl CacheArtifact {
    /// Returns true if the artifact should no longer be served at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_valid || self.expires_at.is_some_and(|at| at <= now)
    }
}
