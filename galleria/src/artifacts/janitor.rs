//! Removal of artifacts whose source is gone or whose lifetime has elapsed.
//!
//! Each removal deletes the record, gives the bytes back to the folder, then
//! deletes the file. Nothing follows a record delete that did not happen, so
//! running the janitor twice never frees bytes twice, and a record replaced
//! by a regeneration keeps its new file.

use std::io::ErrorKind;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::artifacts::{ArtifactStore, CacheArtifact};
use crate::folders::CacheSizeAccountant;
use crate::ids::{CollectionId, ImageId};
use crate::store::StoreResult;

/// Outcome of a janitor pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JanitorReport {
    /// Artifact records removed.
    pub removed: usize,
    /// Bytes returned to folder accounting.
    pub bytes_freed: u64,
    /// Records whose file was already gone from disk.
    pub files_missing: usize,
    /// Removed records whose file could not be deleted.
    pub failed: usize,
}

impl JanitorReport {
    fn merge(&mut self, other: JanitorReport) {
        self.removed += other.removed;
        self.bytes_freed += other.bytes_freed;
        self.files_missing += other.files_missing;
        self.failed += other.failed;
    }
}

/// Deletes cache artifacts and keeps folder accounting in step.
#[derive(Clone)]
pub struct ArtifactJanitor {
    artifacts: Arc<dyn ArtifactStore>,
    accountant: CacheSizeAccountant,
}

impl ArtifactJanitor {
    pub fn new(artifacts: Arc<dyn ArtifactStore>, accountant: CacheSizeAccountant) -> Self {
        Self {
            artifacts,
            accountant,
        }
    }

    /// Marks an image's artifacts invalid without touching disk.
    ///
    /// Invalid artifacts are no longer served and are removed by the next
    /// [`purge_expired`](Self::purge_expired).
    pub fn invalidate_image(&self, image_id: &ImageId) -> StoreResult<usize> {
        let changed = self.artifacts.invalidate_artifacts_for_image(image_id)?;
        debug!(image_id = %image_id, changed, "Invalidated image artifacts");
        Ok(changed)
    }

    /// Removes every artifact of a deleted source image.
    pub async fn remove_for_image(&self, image_id: &ImageId) -> StoreResult<JanitorReport> {
        let artifacts = self.artifacts.artifacts_for_image(image_id)?;
        let report = self.remove_all(artifacts).await?;
        info!(image_id = %image_id, removed = report.removed, "Removed image artifacts");
        Ok(report)
    }

    /// Removes every artifact belonging to a deleted collection.
    pub async fn remove_for_collection(
        &self,
        collection_id: &CollectionId,
    ) -> StoreResult<JanitorReport> {
        let artifacts = self.artifacts.artifacts_for_collection(collection_id)?;
        let report = self.remove_all(artifacts).await?;
        info!(
            collection_id = %collection_id,
            removed = report.removed,
            "Removed collection artifacts"
        );
        Ok(report)
    }

    /// Removes artifacts that are invalid or expired at `now`.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<JanitorReport> {
        let artifacts = self.artifacts.expired_artifacts(now)?;
        if artifacts.is_empty() {
            return Ok(JanitorReport::default());
        }
        let report = self.remove_all(artifacts).await?;
        info!(
            removed = report.removed,
            bytes_freed = report.bytes_freed,
            "Purged expired artifacts"
        );
        Ok(report)
    }

    async fn remove_all(&self, artifacts: Vec<CacheArtifact>) -> StoreResult<JanitorReport> {
        let mut report = JanitorReport::default();
        for artifact in &artifacts {
            report.merge(self.remove(artifact).await?);
        }
        Ok(report)
    }

    async fn remove(&self, artifact: &CacheArtifact) -> StoreResult<JanitorReport> {
        let mut report = JanitorReport::default();

        // A regeneration may have replaced the record since it was listed.
        if !self.artifacts.delete_artifact(&artifact.id)? {
            return Ok(report);
        }
        report.removed += 1;

        match self
            .accountant
            .decrement(&artifact.folder_id, artifact.file_size_bytes)
        {
            Ok(_) => report.bytes_freed += artifact.file_size_bytes,
            Err(e) => warn!(
                folder_id = %artifact.folder_id,
                bytes = artifact.file_size_bytes,
                error = %e,
                "Failed to release artifact bytes, folder size will drift until reconciled"
            ),
        }

        if self.path_reclaimed(artifact)? {
            debug!(
                artifact_id = %artifact.id,
                path = %artifact.path.display(),
                "Artifact path now owned by a newer record, keeping file"
            );
            return Ok(report);
        }

        match tokio::fs::remove_file(&artifact.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => report.files_missing += 1,
            Err(e) => {
                warn!(
                    artifact_id = %artifact.id,
                    path = %artifact.path.display(),
                    error = %e,
                    "Failed to delete artifact file, left on disk"
                );
                report.failed += 1;
            }
        }
        Ok(report)
    }

    /// True if another record of the same image and profile points at the
    /// artifact's file.
    fn path_reclaimed(&self, artifact: &CacheArtifact) -> StoreResult<bool> {
        Ok(self
            .artifacts
            .find_artifact(&artifact.image_id, &artifact.profile_key)?
            .is_some_and(|current| current.id != artifact.id && current.path == artifact.path))
    }
}
