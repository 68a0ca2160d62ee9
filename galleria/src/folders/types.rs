//! Cache folder records.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::FolderId;

/// A prioritised, capacity-bounded storage location for cache artifacts.
///
/// `current_size_bytes` and `total_files` are owned by the store and only
/// change through the size accountant's atomic operations. Values read from
/// a `CacheFolder` are snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheFolder {
    pub id: FolderId,
    pub name: String,
    /// Root directory artifacts are written under.
    pub path: PathBuf,
    /// Lower values are preferred by the allocator.
    pub priority: i32,
    /// `None` means the folder has no capacity limit.
    pub max_size_bytes: Option<u64>,
    pub current_size_bytes: u64,
    pub total_files: u64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CacheFolder {
    /// Creates a fresh, empty folder record from a creation request.
    pub fn new(request: NewCacheFolder) -> Self {
        let now = Utc::now();
        Self {
            id: FolderId::new(),
            name: request.name,
            path: request.path,
            priority: request.priority,
            max_size_bytes: request.max_size_bytes,
            current_size_bytes: 0,
            total_files: 0,
            is_active: request.is_active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bytes left before the folder reaches its limit, `None` if unlimited.
    pub fn remaining_bytes(&self) -> Option<u64> {
        self.max_size_bytes
            .map(|max| max.saturating_sub(self.current_size_bytes))
    }

    /// Returns true if `bytes` more would still fit under the limit.
    pub fn can_fit(&self, bytes: u64) -> bool {
        match self.max_size_bytes {
            None => true,
            Some(max) => self
                .current_size_bytes
                .checked_add(bytes)
                .is_some_and(|projected| projected <= max),
        }
    }

    /// Fraction of capacity in use (0.0 for unlimited folders).
    pub fn utilization(&self) -> f64 {
        match self.max_size_bytes {
            None => 0.0,
            Some(0) => 1.0,
            Some(max) => self.current_size_bytes as f64 / max as f64,
        }
    }

    /// Applies a metadata update. Size counters are never touched here.
    pub fn apply_update(&mut self, update: &FolderUpdate, at: DateTime<Utc>) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(path) = &update.path {
            self.path = path.clone();
        }
        if let Some(priority) = update.priority {
            self.priority = priority;
        }
        if let Some(max) = update.max_size_bytes {
            self.max_size_bytes = max;
        }
        if let Some(active) = update.is_active {
            self.is_active = active;
        }
        self.updated_at = at;
    }
}

/// Request to create a cache folder.
#[derive(Debug, Clone)]
pub struct NewCacheFolder {
    pub name: String,
    pub path: PathBuf,
    pub priority: i32,
    pub max_size_bytes: Option<u64>,
    pub is_active: bool,
}

impl NewCacheFolder {
    /// Creates an active, unlimited folder request.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, priority: i32) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            priority,
            max_size_bytes: None,
            is_active: true,
        }
    }

    /// Sets the capacity limit.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size_bytes = Some(bytes);
        self
    }

    /// Sets whether the folder takes new artifacts.
    pub fn with_active(mut self, active: bool) -> Self {
        self.is_active = active;
        self
    }
}

/// Partial update of folder metadata. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct FolderUpdate {
    pub name: Option<String>,
    pub path: Option<PathBuf>,
    pub priority: Option<i32>,
    /// `Some(None)` removes the limit.
    pub max_size_bytes: Option<Option<u64>>,
    pub is_active: Option<bool>,
}

impl FolderUpdate {
    /// Returns true if the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.path.is_none()
            && self.priority.is_none()
            && self.max_size_bytes.is_none()
            && self.is_active.is_none()
    }
}

/// Aggregate statistics across all cache folders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FolderStats {
    pub folder_count: usize,
    pub active_count: usize,
    pub total_size_bytes: u64,
    pub total_files: u64,
    pub average_priority: f64,
}

impl FolderStats {
    /// Computes statistics from a folder listing.
    pub fn from_folders(folders: &[CacheFolder]) -> Self {
        if folders.is_empty() {
            return Self::default();
        }

        let priority_sum: i64 = folders.iter().map(|f| i64::from(f.priority)).sum();

        Self {
            folder_count: folders.len(),
            active_count: folders.iter().filter(|f| f.is_active).count(),
            total_size_bytes: folders.iter().map(|f| f.current_size_bytes).sum(),
            total_files: folders.iter().map(|f| f.total_files).sum(),
            average_priority: priority_sum as f64 / folders.len() as f64,
        }
    }
}
