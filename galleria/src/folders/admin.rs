//! Cache folder administration.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::artifacts::ArtifactStore;
use crate::folders::accountant::{CacheSizeAccountant, Reconciliation};
use crate::folders::{CacheFolder, CacheFolderStore, FolderStats, FolderUpdate, NewCacheFolder};
use crate::ids::FolderId;
use crate::store::StoreError;

/// Name of the file written and removed to prove a folder is writable.
const WRITE_PROBE: &str = ".galleria_write_probe";

/// Errors from folder administration.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Invalid folder name: {0}")]
    InvalidName(String),

    #[error("Invalid folder path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Path {0} is already used by another cache folder")]
    DuplicatePath(PathBuf),

    #[error("Cache folder not found: {0}")]
    NotFound(FolderId),

    #[error("Cache folder {id} still holds {bytes} bytes in {files} files")]
    FolderNotEmpty { id: FolderId, bytes: u64, files: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Create, update, delete, list and inspect cache folders.
#[derive(Clone)]
pub struct CacheFolderAdmin {
    folders: Arc<dyn CacheFolderStore>,
    artifacts: Arc<dyn ArtifactStore>,
    accountant: CacheSizeAccountant,
}

impl CacheFolderAdmin {
    pub fn new(folders: Arc<dyn CacheFolderStore>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        let accountant = CacheSizeAccountant::new(Arc::clone(&folders));
        Self {
            folders,
            artifacts,
            accountant,
        }
    }

    /// Checks that `path` can hold cache artifacts.
    ///
    /// The directory is created if missing. It must be a directory and a
    /// probe file must be creatable inside it.
    pub fn validate_path(&self, path: &Path) -> Result<(), AdminError> {
        let invalid = |reason: String| AdminError::InvalidPath {
            path: path.to_path_buf(),
            reason,
        };

        if path.as_os_str().is_empty() {
            return Err(invalid("path is empty".to_string()));
        }
        if !path.is_absolute() {
            return Err(invalid("path must be absolute".to_string()));
        }
        if path.exists() && !path.is_dir() {
            return Err(invalid("not a directory".to_string()));
        }
        std::fs::create_dir_all(path).map_err(|e| invalid(format!("cannot create: {}", e)))?;

        let probe = path.join(WRITE_PROBE);
        OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&probe)
            .map_err(|e| invalid(format!("not writable: {}", e)))?;
        let _ = std::fs::remove_file(&probe);
        Ok(())
    }

    /// Registers a new cache folder.
    pub fn create(&self, request: NewCacheFolder) -> Result<CacheFolder, AdminError> {
        validate_name(&request.name)?;
        self.validate_path(&request.path)?;
        self.ensure_path_unused(&request.path, None)?;

        let folder = CacheFolder::new(request);
        self.folders.insert_folder(&folder)?;
        info!(
            folder_id = %folder.id,
            name = %folder.name,
            path = %folder.path.display(),
            priority = folder.priority,
            max_size_bytes = ?folder.max_size_bytes,
            "Cache folder created"
        );
        Ok(folder)
    }

    /// Changes folder metadata. Size counters are never affected.
    pub fn update(&self, id: &FolderId, update: &FolderUpdate) -> Result<CacheFolder, AdminError> {
        if update.is_empty() {
            return self.get(id);
        }
        if let Some(name) = &update.name {
            validate_name(name)?;
        }
        if let Some(path) = &update.path {
            self.validate_path(path)?;
            self.ensure_path_unused(path, Some(id))?;
        }

        let folder = self.folders.update_folder(id, update).map_err(|e| match e {
            StoreError::NotFound { .. } => AdminError::NotFound(*id),
            other => AdminError::Store(other),
        })?;
        info!(folder_id = %id, "Cache folder updated");
        Ok(folder)
    }

    /// Removes a folder record.
    ///
    /// Refused while the folder still accounts for stored bytes, unless
    /// `force` is set. A forced delete also drops the folder's artifact
    /// records; files on disk are left alone.
    pub fn delete(&self, id: &FolderId, force: bool) -> Result<CacheFolder, AdminError> {
        let folder = self.get(id)?;
        if !force && (folder.current_size_bytes > 0 || folder.total_files > 0) {
            return Err(AdminError::FolderNotEmpty {
                id: *id,
                bytes: folder.current_size_bytes,
                files: folder.total_files,
            });
        }

        if force {
            let orphaned = self.artifacts.artifacts_in_folder(id)?;
            for artifact in &orphaned {
                self.artifacts.delete_artifact(&artifact.id)?;
            }
            if !orphaned.is_empty() {
                warn!(
                    folder_id = %id,
                    artifacts = orphaned.len(),
                    "Force-deleted folder still had artifact records"
                );
            }
        }

        self.folders.delete_folder(id)?;
        info!(folder_id = %id, name = %folder.name, "Cache folder deleted");
        Ok(folder)
    }

    pub fn get(&self, id: &FolderId) -> Result<CacheFolder, AdminError> {
        self.folders.get_folder(id)?.ok_or(AdminError::NotFound(*id))
    }

    /// Lists folders by priority.
    pub fn list(&self) -> Result<Vec<CacheFolder>, AdminError> {
        Ok(self.folders.list_folders()?)
    }

    pub fn stats(&self) -> Result<FolderStats, AdminError> {
        Ok(FolderStats::from_folders(&self.folders.list_folders()?))
    }

    /// Recomputes one folder's counters from its artifact records.
    ///
    /// Expects no concurrent writes to the folder; see
    /// [`CacheSizeAccountant::reconcile`].
    pub fn reconcile(&self, id: &FolderId) -> Result<Reconciliation, AdminError> {
        self.get(id)?;
        Ok(self.accountant.reconcile(id, self.artifacts.as_ref())?)
    }

    /// Reconciles every folder.
    pub fn reconcile_all(&self) -> Result<Vec<Reconciliation>, AdminError> {
        self.folders
            .list_folders()?
            .iter()
            .map(|f| Ok(self.accountant.reconcile(&f.id, self.artifacts.as_ref())?))
            .collect()
    }

    fn ensure_path_unused(&self, path: &Path, except: Option<&FolderId>) -> Result<(), AdminError> {
        let taken = self
            .folders
            .list_folders()?
            .into_iter()
            .any(|f| f.path == path && Some(&f.id) != except);
        if taken {
            return Err(AdminError::DuplicatePath(path.to_path_buf()));
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), AdminError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AdminError::InvalidName("name is empty".to_string()));
    }
    if trimmed.len() > 100 {
        return Err(AdminError::InvalidName(
            "name is longer than 100 characters".to_string(),
        ));
    }
    Ok(())
}
