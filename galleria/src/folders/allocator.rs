//! Cache folder selection.
//!
//! The allocator is a pure function of the candidate snapshot: it never
//! mutates folders and never reserves space. Two workers may both be handed
//! the same folder for items that only fit one at a time; the size counter
//! then reflects the overshoot and the next allocation sees it.

use thiserror::Error;

use crate::folders::CacheFolder;
use crate::ids::FolderId;

/// Errors from folder allocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// No active folder has room for the item.
    #[error(
        "No cache folder has capacity for {required_bytes} bytes \
         ({active_folders} active of {candidates} candidates)"
    )]
    NoCapacity {
        required_bytes: u64,
        candidates: usize,
        active_folders: usize,
    },
}

/// Picks the destination folder for new artifacts.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheFolderAllocator;

impl CacheFolderAllocator {
    pub fn new() -> Self {
        Self
    }

    /// Selects a folder for an item of `required_bytes`.
    ///
    /// Only active folders that can take the item without exceeding their
    /// limit qualify. Among those the lowest priority wins; ties go to the
    /// least utilised folder, then the lowest id.
    ///
    /// # Example
    ///
    /// ```
    /// use galleria::folders::{CacheFolder, CacheFolderAllocator, NewCacheFolder};
    ///
    /// let slow = CacheFolder::new(NewCacheFolder::new("hdd", "/mnt/hdd", 2));
    /// let fast = CacheFolder::new(NewCacheFolder::new("ssd", "/mnt/ssd", 1).with_max_size(100));
    ///
    /// let allocator = CacheFolderAllocator::new();
    /// assert_eq!(allocator.allocate(&[slow.clone(), fast.clone()], 50).unwrap(), fast.id);
    /// assert_eq!(allocator.allocate(&[slow.clone(), fast], 500).unwrap(), slow.id);
    /// ```
    pub fn allocate(
        &self,
        candidates: &[CacheFolder],
        required_bytes: u64,
    ) -> Result<FolderId, AllocationError> {
        candidates
            .iter()
            .filter(|f| f.is_active && f.can_fit(required_bytes))
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.utilization().total_cmp(&b.utilization()))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|f| f.id)
            .ok_or(AllocationError::NoCapacity {
                required_bytes,
                candidates: candidates.len(),
                active_folders: candidates.iter().filter(|f| f.is_active).count(),
            })
    }
}
