//! Persistence contract for cache folders.

use crate::folders::types::{CacheFolder, FolderUpdate};
use crate::ids::FolderId;
use crate::store::StoreResult;

/// Persisted cache folder records.
///
/// The size counter methods are the only way `current_size_bytes` and
/// `total_files` change. Each one is a single atomic operation at the
/// storage layer: implementations must not read the counter into the caller
/// and write it back.
pub trait CacheFolderStore: Send + Sync {
    /// Inserts a new folder. Fails with `Conflict` if the id already exists.
    fn insert_folder(&self, folder: &CacheFolder) -> StoreResult<()>;

    fn get_folder(&self, id: &FolderId) -> StoreResult<Option<CacheFolder>>;

    /// Lists all folders ordered by priority, then id.
    fn list_folders(&self) -> StoreResult<Vec<CacheFolder>>;

    /// Lists active folders ordered by priority, then id.
    fn list_active_folders(&self) -> StoreResult<Vec<CacheFolder>>;

    /// Updates folder metadata and returns the updated record.
    fn update_folder(&self, id: &FolderId, update: &FolderUpdate) -> StoreResult<CacheFolder>;

    /// Deletes a folder record. Returns false if it did not exist.
    fn delete_folder(&self, id: &FolderId) -> StoreResult<bool>;

    /// Atomically adds `bytes` and `files` to the folder's counters.
    ///
    /// Returns the new `current_size_bytes`.
    fn increment_size(&self, id: &FolderId, bytes: u64, files: u64) -> StoreResult<u64>;

    /// Atomically subtracts from the folder's counters, clamping each at zero.
    ///
    /// Returns the new `current_size_bytes`.
    fn decrement_size(&self, id: &FolderId, bytes: u64, files: u64) -> StoreResult<u64>;

    /// Overwrites the counters. Used only by reconciliation.
    fn set_size(&self, id: &FolderId, bytes: u64, files: u64) -> StoreResult<()>;
}
