//! In-memory store backed by concurrent hash maps.
//!
//! Every atomic operation runs while holding the DashMap shard lock of the
//! record it changes (`get_mut`, `entry`, `insert`), which gives the same
//! add-if-absent and increment guarantees as the SQLite backend within one
//! process.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::warn;

use crate::artifacts::{ArtifactStore, CacheArtifact};
use crate::folders::{CacheFolder, CacheFolderStore, FolderUpdate};
use crate::ids::{ArtifactId, CollectionId, FolderId, ImageId, JobId};
use crate::jobs::{
    ItemOutcome, JobStateStore, JobStatus, ProcessingJob, StatusChange, TransitionOutcome,
};
use crate::store::{StoreError, StoreResult};

type ArtifactKey = (ImageId, String);

/// Store keeping all records in process memory.
///
/// # Example
///
/// ```
/// use galleria::folders::{CacheFolder, CacheFolderStore, NewCacheFolder};
/// use galleria::store::MemoryStore;
///
/// let store = MemoryStore::new();
/// let folder = CacheFolder::new(NewCacheFolder::new("ssd", "/tmp/ssd", 1));
/// store.insert_folder(&folder).unwrap();
///
/// assert_eq!(store.increment_size(&folder.id, 512, 1).unwrap(), 512);
/// assert_eq!(store.decrement_size(&folder.id, 4096, 1).unwrap(), 0);
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    folders: DashMap<FolderId, CacheFolder>,
    jobs: DashMap<JobId, ProcessingJob>,
    artifacts: DashMap<ArtifactKey, CacheArtifact>,
    available: AtomicBool,
    failures_pending: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            folders: DashMap::new(),
            jobs: DashMap::new(),
            artifacts: DashMap::new(),
            available: AtomicBool::new(true),
            failures_pending: AtomicUsize::new(0),
        }
    }

    /// Simulates the backing store going away.
    ///
    /// While unavailable every operation fails with
    /// [`StoreError::Unavailable`] and changes nothing.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Simulates a transient outage: the next `count` operations fail with
    /// [`StoreError::Unavailable`], later ones succeed.
    pub fn fail_next(&self, count: usize) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        let transient = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            return Err(StoreError::Unavailable("memory store outage".to_string()));
        }
        Ok(())
    }

    fn sorted_folders(&self, active_only: bool) -> Vec<CacheFolder> {
        let mut folders: Vec<CacheFolder> = self
            .folders
            .iter()
            .filter(|f| !active_only || f.is_active)
            .map(|f| f.value().clone())
            .collect();
        folders.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));
        folders
    }

    fn artifacts_where(&self, pred: impl Fn(&CacheArtifact) -> bool) -> Vec<CacheArtifact> {
        let mut found: Vec<CacheArtifact> = self
            .artifacts
            .iter()
            .filter(|a| pred(a.value()))
            .map(|a| a.value().clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        found
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache folders
// ─────────────────────────────────────────────────────────────────────────────

impl CacheFolderStore for MemoryStore {
    fn insert_folder(&self, folder: &CacheFolder) -> StoreResult<()> {
        self.check()?;
        match self.folders.entry(folder.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "cache folder {} already exists",
                folder.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(folder.clone());
                Ok(())
            }
        }
    }

    fn get_folder(&self, id: &FolderId) -> StoreResult<Option<CacheFolder>> {
        self.check()?;
        Ok(self.folders.get(id).map(|f| f.value().clone()))
    }

    fn list_folders(&self) -> StoreResult<Vec<CacheFolder>> {
        self.check()?;
        Ok(self.sorted_folders(false))
    }

    fn list_active_folders(&self) -> StoreResult<Vec<CacheFolder>> {
        self.check()?;
        Ok(self.sorted_folders(true))
    }

    fn update_folder(&self, id: &FolderId, update: &FolderUpdate) -> StoreResult<CacheFolder> {
        self.check()?;
        let mut folder = self
            .folders
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("cache folder", id))?;
        folder.apply_update(update, Utc::now());
        Ok(folder.clone())
    }

    fn delete_folder(&self, id: &FolderId) -> StoreResult<bool> {
        self.check()?;
        Ok(self.folders.remove(id).is_some())
    }

    fn increment_size(&self, id: &FolderId, bytes: u64, files: u64) -> StoreResult<u64> {
        self.check()?;
        let mut folder = self
            .folders
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("cache folder", id))?;
        folder.current_size_bytes = folder.current_size_bytes.saturating_add(bytes);
        folder.total_files = folder.total_files.saturating_add(files);
        folder.updated_at = Utc::now();
        Ok(folder.current_size_bytes)
    }

    fn decrement_size(&self, id: &FolderId, bytes: u64, files: u64) -> StoreResult<u64> {
        self.check()?;
        let mut folder = self
            .folders
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("cache folder", id))?;
        if bytes > folder.current_size_bytes {
            warn!(
                folder_id = %id,
                current = folder.current_size_bytes,
                requested = bytes,
                "Size decrement below zero, clamping"
            );
        }
        folder.current_size_bytes = folder.current_size_bytes.saturating_sub(bytes);
        folder.total_files = folder.total_files.saturating_sub(files);
        folder.updated_at = Utc::now();
        Ok(folder.current_size_bytes)
    }

    fn set_size(&self, id: &FolderId, bytes: u64, files: u64) -> StoreResult<()> {
        self.check()?;
        let mut folder = self
            .folders
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("cache folder", id))?;
        folder.current_size_bytes = bytes;
        folder.total_files = files;
        folder.updated_at = Utc::now();
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Jobs
// ─────────────────────────────────────────────────────────────────────────────

impl JobStateStore for MemoryStore {
    fn insert_job(&self, job: &ProcessingJob) -> StoreResult<()> {
        self.check()?;
        match self.jobs.entry(job.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "job {} already exists",
                job.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
                Ok(())
            }
        }
    }

    fn get_job(&self, id: &JobId) -> StoreResult<Option<ProcessingJob>> {
        self.check()?;
        Ok(self.jobs.get(id).map(|j| j.value().clone()))
    }

    fn list_jobs(&self, status: Option<JobStatus>) -> StoreResult<Vec<ProcessingJob>> {
        self.check()?;
        let mut jobs: Vec<ProcessingJob> = self
            .jobs
            .iter()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .map(|j| j.value().clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    fn record_item(
        &self,
        id: &JobId,
        image_id: &ImageId,
        outcome: &ItemOutcome,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.check()?;
        let mut job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("job", id))?;
        Ok(job.record_item(image_id, outcome, at))
    }

    fn is_item_handled(&self, id: &JobId, image_id: &ImageId) -> StoreResult<bool> {
        self.check()?;
        let job = self
            .jobs
            .get(id)
            .ok_or_else(|| StoreError::not_found("job", id))?;
        Ok(job.is_handled(image_id))
    }

    fn transition_job(
        &self,
        id: &JobId,
        from: &[JobStatus],
        change: &StatusChange,
    ) -> StoreResult<TransitionOutcome> {
        self.check()?;
        let mut job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("job", id))?;

        if !job.accepts_transition(from, change.to) {
            return Ok(TransitionOutcome::Rejected {
                current: job.status,
            });
        }
        job.apply_status(change);
        Ok(TransitionOutcome::Applied(job.clone()))
    }

    fn flip_stale_job(
        &self,
        id: &JobId,
        cutoff: DateTime<Utc>,
        change: &StatusChange,
    ) -> StoreResult<bool> {
        self.check()?;
        let Some(mut job) = self.jobs.get_mut(id) else {
            return Ok(false);
        };

        if !job.is_stale(cutoff) || !job.status.can_transition_to(change.to) {
            return Ok(false);
        }
        job.apply_status(change);
        Ok(true)
    }

    fn list_stale_jobs(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<ProcessingJob>> {
        self.check()?;
        Ok(self
            .jobs
            .iter()
            .filter(|j| j.is_stale(cutoff))
            .map(|j| j.value().clone())
            .collect())
    }

    fn delete_terminal_jobs_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.check()?;
        let before = self.jobs.len();
        self.jobs
            .retain(|_, job| !(job.status.is_terminal() && job.updated_at < cutoff));
        Ok(before.saturating_sub(self.jobs.len()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Artifacts
// ─────────────────────────────────────────────────────────────────────────────

impl ArtifactStore for MemoryStore {
    fn upsert_artifact(&self, artifact: &CacheArtifact) -> StoreResult<Option<CacheArtifact>> {
        self.check()?;
        let key = (artifact.image_id.clone(), artifact.profile_key.clone());
        Ok(self.artifacts.insert(key, artifact.clone()))
    }

    fn get_artifact(&self, id: &ArtifactId) -> StoreResult<Option<CacheArtifact>> {
        self.check()?;
        Ok(self
            .artifacts
            .iter()
            .find(|a| a.id == *id)
            .map(|a| a.value().clone()))
    }

    fn find_artifact(
        &self,
        image_id: &ImageId,
        profile_key: &str,
    ) -> StoreResult<Option<CacheArtifact>> {
        self.check()?;
        let key = (image_id.clone(), profile_key.to_string());
        Ok(self.artifacts.get(&key).map(|a| a.value().clone()))
    }

    fn artifacts_for_image(&self, image_id: &ImageId) -> StoreResult<Vec<CacheArtifact>> {
        self.check()?;
        Ok(self.artifacts_where(|a| a.image_id == *image_id))
    }

    fn artifacts_for_collection(
        &self,
        collection_id: &CollectionId,
    ) -> StoreResult<Vec<CacheArtifact>> {
        self.check()?;
        Ok(self.artifacts_where(|a| a.collection_id.as_ref() == Some(collection_id)))
    }

    fn artifacts_in_folder(&self, folder_id: &FolderId) -> StoreResult<Vec<CacheArtifact>> {
        self.check()?;
        Ok(self.artifacts_where(|a| a.folder_id == *folder_id))
    }

    fn invalidate_artifacts_for_image(&self, image_id: &ImageId) -> StoreResult<usize> {
        self.check()?;
        let mut changed = 0;
        for mut artifact in self.artifacts.iter_mut() {
            if artifact.image_id == *image_id && artifact.is_valid {
                artifact.is_valid = false;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn expired_artifacts(&self, now: DateTime<Utc>) -> StoreResult<Vec<CacheArtifact>> {
        self.check()?;
        Ok(self.artifacts_where(|a| a.is_expired(now)))
    }

    fn delete_artifact(&self, id: &ArtifactId) -> StoreResult<bool> {
        self.check()?;
        let key = self
            .artifacts
            .iter()
            .find(|a| a.id == *id)
            .map(|a| a.key().clone());
        Ok(match key {
            Some(key) => self.artifacts.remove_if(&key, |_, a| a.id == *id).is_some(),
            None => false,
        })
    }

    fn folder_usage(&self, folder_id: &FolderId) -> StoreResult<(u64, u64)> {
        self.check()?;
        Ok(self
            .artifacts
            .iter()
            .filter(|a| a.folder_id == *folder_id)
            .fold((0, 0), |(bytes, files), a| {
                (bytes + a.file_size_bytes, files + 1)
            }))
    }
}
