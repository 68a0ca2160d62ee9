//! Cache folders: prioritised, capacity-bounded storage locations.
//!
//! - [`CacheFolderStore`]: persistence, including atomic size counters
//! - [`CacheSizeAccountant`]: applies size deltas and reconciles drift
//! - [`CacheFolderAllocator`]: picks the destination folder for an artifact
//! - [`CacheFolderAdmin`]: create, update, delete, list and validate folders

mod accountant;
mod admin;
mod allocator;
mod store;
mod types;

pub use accountant::{CacheSizeAccountant, Reconciliation};
pub use admin::{AdminError, CacheFolderAdmin};
pub use allocator::{AllocationError, CacheFolderAllocator};
pub use store::CacheFolderStore;
pub use types::{CacheFolder, FolderStats, FolderUpdate, NewCacheFolder};
