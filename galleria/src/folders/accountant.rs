//! Per-folder size accounting.
//!
//! All counter changes are delegated to the store's atomic operations, so
//! concurrent writers (tasks in one process or several processes sharing a
//! SQLite file) never lose an update.

use std::sync::Arc;

use tracing::{debug, info};

use crate::artifacts::ArtifactStore;
use crate::folders::CacheFolderStore;
use crate::ids::FolderId;
use crate::store::{StoreError, StoreResult};

/// Result of recomputing a folder's counters from its artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub folder_id: FolderId,
    pub previous_bytes: u64,
    pub previous_files: u64,
    pub actual_bytes: u64,
    pub actual_files: u64,
}

impl Reconciliation {
    /// Signed drift that was corrected (`actual - previous`).
    pub fn drift_bytes(&self) -> i128 {
        i128::from(self.actual_bytes) - i128::from(self.previous_bytes)
    }

    pub fn changed(&self) -> bool {
        self.previous_bytes != self.actual_bytes || self.previous_files != self.actual_files
    }
}

/// Applies size deltas to cache folders.
///
/// A failed call means the counter was not changed. Callers that can tolerate
/// drift (the generation pipeline) log and continue; [`reconcile`] corrects
/// drift afterwards.
///
/// [`reconcile`]: CacheSizeAccountant::reconcile
#[derive(Clone)]
pub struct CacheSizeAccountant {
    folders: Arc<dyn CacheFolderStore>,
}

impl CacheSizeAccountant {
    pub fn new(folders: Arc<dyn CacheFolderStore>) -> Self {
        Self { folders }
    }

    /// Adds one file of `bytes` to the folder. Returns the new size.
    pub fn increment(&self, folder_id: &FolderId, bytes: u64) -> StoreResult<u64> {
        let size = self.folders.increment_size(folder_id, bytes, 1)?;
        debug!(folder_id = %folder_id, bytes, size, "Folder size incremented");
        Ok(size)
    }

    /// Removes one file of `bytes` from the folder, clamping at zero.
    /// Returns the new size.
    pub fn decrement(&self, folder_id: &FolderId, bytes: u64) -> StoreResult<u64> {
        let size = self.folders.decrement_size(folder_id, bytes, 1)?;
        debug!(folder_id = %folder_id, bytes, size, "Folder size decremented");
        Ok(size)
    }

    /// Recomputes the folder's counters from its artifact records.
    ///
    /// The read of the records and the overwrite are separate steps, and the
    /// pipeline increments a folder before it stores the artifact record.
    /// The result is only exact while nothing writes to the folder;
    /// [`GalleriaService::reconcile_folders`] enforces that for callers.
    ///
    /// [`GalleriaService::reconcile_folders`]: crate::service::GalleriaService::reconcile_folders
    pub fn reconcile(
        &self,
        folder_id: &FolderId,
        artifacts: &dyn ArtifactStore,
    ) -> StoreResult<Reconciliation> {
        let folder = self
            .folders
            .get_folder(folder_id)?
            .ok_or_else(|| StoreError::not_found("cache folder", folder_id))?;
        let (actual_bytes, actual_files) = artifacts.folder_usage(folder_id)?;
        self.folders.set_size(folder_id, actual_bytes, actual_files)?;

        let report = Reconciliation {
            folder_id: *folder_id,
            previous_bytes: folder.current_size_bytes,
            previous_files: folder.total_files,
            actual_bytes,
            actual_files,
        };
        if report.changed() {
            info!(
                folder_id = %folder_id,
                previous_bytes = report.previous_bytes,
                actual_bytes,
                actual_files,
                "Corrected folder size drift"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use chrono::Utc;

    use crate::artifacts::CacheArtifact;
    use crate::folders::{CacheFolder, NewCacheFolder};
    use crate::ids::{ArtifactId, ImageId};
    use crate::store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, CacheSizeAccountant, FolderId) {
        let store = Arc::new(MemoryStore::new());
        let folder = CacheFolder::new(NewCacheFolder::new("a", "/tmp/a", 1));
        store.insert_folder(&folder).unwrap();
        let accountant = CacheSizeAccountant::new(store.clone());
        (store, accountant, folder.id)
    }

    #[test]
    fn test_increment_then_decrement() {
        let (store, accountant, id) = setup();
        assert_eq!(accountant.increment(&id, 500).unwrap(), 500);
        assert_eq!(accountant.increment(&id, 250).unwrap(), 750);
        assert_eq!(accountant.decrement(&id, 500).unwrap(), 250);

        let folder = store.get_folder(&id).unwrap().unwrap();
        assert_eq!(folder.total_files, 1);
    }

    #[test]
    fn test_decrement_underflow_clamps() {
        let (_, accountant, id) = setup();
        accountant.increment(&id, 10).unwrap();
        assert_eq!(accountant.decrement(&id, 1_000).unwrap(), 0);
    }

    #[test]
    fn test_unavailable_store_reports_failure() {
        let (store, accountant, id) = setup();
        store.set_available(false);
        assert!(matches!(
            accountant.increment(&id, 10),
            Err(StoreError::Unavailable(_))
        ));
        store.set_available(true);
        assert_eq!(store.get_folder(&id).unwrap().unwrap().current_size_bytes, 0);
    }

    #[tokio::test]
    async fn test_concurrent_tasks_sum_exactly() {
        let (store, accountant, id) = setup();
        accountant.increment(&id, 10_000).unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let accountant = accountant.clone();
            tasks.spawn(async move {
                for _ in 0..50 {
                    if i % 2 == 0 {
                        accountant.increment(&id, 3).unwrap();
                    } else {
                        accountant.decrement(&id, 2).unwrap();
                    }
                    tokio::task::yield_now().await;
                }
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        let folder = store.get_folder(&id).unwrap().unwrap();
        assert_eq!(folder.current_size_bytes, 10_000 + 8 * 50 * 3 - 8 * 50 * 2);
    }

    #[test]
    fn test_reconcile_corrects_drift() {
        let (store, accountant, id) = setup();
        accountant.increment(&id, 999).unwrap();
        store
            .upsert_artifact(&CacheArtifact {
                id: ArtifactId::new(),
                image_id: ImageId::from("a"),
                collection_id: None,
                profile_key: "p".into(),
                folder_id: id,
                path: PathBuf::from("/tmp/a/a.jpg"),
                width: 1,
                height: 1,
                file_size_bytes: 120,
                created_at: Utc::now(),
                expires_at: None,
                is_valid: true,
            })
            .unwrap();

        let report = accountant.reconcile(&id, store.as_ref()).unwrap();
        assert!(report.changed());
        assert_eq!(report.drift_bytes(), 120 - 999);

        let folder = store.get_folder(&id).unwrap().unwrap();
        assert_eq!(folder.current_size_bytes, 120);
        assert_eq!(folder.total_files, 1);
    }
}
