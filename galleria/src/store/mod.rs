//! Persistence backends.
//!
//! Each aggregate has its own repository trait, defined next to the model it
//! stores:
//!
//! - [`CacheFolderStore`](crate::folders::CacheFolderStore) for cache folders
//! - [`JobStateStore`](crate::jobs::JobStateStore) for processing jobs
//! - [`ArtifactStore`](crate::artifacts::ArtifactStore) for cache artifacts
//!
//! This module provides the two backends that implement all three:
//!
//! - [`MemoryStore`]: DashMap-backed, for tests and single-process use
//! - [`SqliteStore`]: SQLite-backed, durable and safe across processes
//!
//! Atomic operations (size counters, item marks, status transitions) are
//! trait methods, so neither backend ever exposes a read-modify-write cycle
//! to callers.

mod error;
mod memory;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::artifacts::ArtifactStore;
use crate::folders::CacheFolderStore;
use crate::jobs::JobStateStore;

use std::sync::Arc;

/// A backend that stores every aggregate.
///
/// Blanket-implemented for any type implementing the three repository
/// traits, so components can share one `Arc<dyn Store>` and each take the
/// narrow view they need.
pub trait Store: CacheFolderStore + JobStateStore + ArtifactStore {
    fn folder_store(self: Arc<Self>) -> Arc<dyn CacheFolderStore>;
    fn job_store(self: Arc<Self>) -> Arc<dyn JobStateStore>;
    fn artifact_store(self: Arc<Self>) -> Arc<dyn ArtifactStore>;
}

impl<T> Store for T
where
    T: CacheFolderStore + JobStateStore + ArtifactStore + 'static,
{
    fn folder_store(self: Arc<Self>) -> Arc<dyn CacheFolderStore> {
        self
    }

    fn job_store(self: Arc<Self>) -> Arc<dyn JobStateStore> {
        self
    }

    fn artifact_store(self: Arc<Self>) -> Arc<dyn ArtifactStore> {
        self
    }
}
