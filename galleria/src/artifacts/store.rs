//! Persistence contract for cache artifacts.

use chrono::{DateTime, Utc};

use crate::artifacts::types::CacheArtifact;
use crate::ids::{ArtifactId, CollectionId, FolderId, ImageId};
use crate::store::StoreResult;

/// Persisted cache artifact records.
pub trait ArtifactStore: Send + Sync {
    /// Inserts or replaces the artifact for (image, profile key).
    ///
    /// Returns the replaced record, if any. The replacement keeps the new
    /// record's id.
    fn upsert_artifact(&self, artifact: &CacheArtifact) -> StoreResult<Option<CacheArtifact>>;

    fn get_artifact(&self, id: &ArtifactId) -> StoreResult<Option<CacheArtifact>>;

    /// Looks up the artifact of one image rendered with one profile.
    fn find_artifact(
        &self,
        image_id: &ImageId,
        profile_key: &str,
    ) -> StoreResult<Option<CacheArtifact>>;

    fn artifacts_for_image(&self, image_id: &ImageId) -> StoreResult<Vec<CacheArtifact>>;

    fn artifacts_for_collection(
        &self,
        collection_id: &CollectionId,
    ) -> StoreResult<Vec<CacheArtifact>>;

    fn artifacts_in_folder(&self, folder_id: &FolderId) -> StoreResult<Vec<CacheArtifact>>;

    /// Marks every artifact of the image invalid. Returns the count changed.
    fn invalidate_artifacts_for_image(&self, image_id: &ImageId) -> StoreResult<usize>;

    /// Lists artifacts that are invalid or whose expiry is at or before `now`.
    fn expired_artifacts(&self, now: DateTime<Utc>) -> StoreResult<Vec<CacheArtifact>>;

    /// Deletes a record. Returns false if it did not exist.
    fn delete_artifact(&self, id: &ArtifactId) -> StoreResult<bool>;

    /// Total bytes and file count of artifact records in the folder.
    ///
    /// Invalidated artifacts are included: their files stay on disk until
    /// they are purged.
    fn folder_usage(&self, folder_id: &FolderId) -> StoreResult<(u64, u64)>;
}
