//! Cache generation pipeline.
//!
//! Runs one processing job: every image of the job's scope that has no
//! recorded outcome is transformed, placed in a cache folder, accounted and
//! recorded. Workers share a queue that hands each image out once; the
//! tracker's add-if-absent marks make any duplicate across runs a no-op.
//!
//! # Item flow
//!
//! ```text
//! handled? ─yes─► skip
//!    │no
//! transform ─err─► mark_failed("transform: …")
//!    │
//! allocate ─no capacity─► mark_failed("capacity: …")
//!    │
//! write file ─err─► mark_failed("write: …")
//!    │
//! increment folder ─► upsert record ─► mark_processed
//! ```
//!
//! A storage outage is not an item failure: the item is retried a bounded
//! number of times and otherwise left unmarked, and the run ends Paused so
//! a later resume picks it up.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::artifacts::{artifact_path, ArtifactStore, CacheArtifact};
use crate::folders::{CacheFolderAllocator, CacheFolderStore, CacheSizeAccountant};
use crate::ids::{ArtifactId, CollectionId, FolderId, ImageId, JobId};
use crate::jobs::{
    JobError, JobStateTracker, JobStatus, OutputProfile, ProcessingJob, RunControl, StopReason,
};
use crate::pipeline::transform::ImageTransform;
use crate::pipeline::writer::ArtifactWriter;
use crate::store::StoreError;

/// Default number of concurrent workers per run.
pub const DEFAULT_WORKERS: usize = 4;

/// Default retries of an item whose storage operations were unavailable.
pub const DEFAULT_STORAGE_RETRY_ATTEMPTS: u32 = 3;

/// Default delay before retrying such an item (milliseconds).
pub const DEFAULT_STORAGE_RETRY_DELAY_MS: u64 = 500;

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workers: usize,
    pub storage_retry_attempts: u32,
    pub storage_retry_delay: Duration,
    /// Lifetime of generated artifacts. `None` keeps them until invalidated.
    pub artifact_ttl: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            storage_retry_attempts: DEFAULT_STORAGE_RETRY_ATTEMPTS,
            storage_retry_delay: Duration::from_millis(DEFAULT_STORAGE_RETRY_DELAY_MS),
            artifact_ttl: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_storage_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.storage_retry_attempts = attempts;
        self.storage_retry_delay = delay;
        self
    }

    pub fn with_artifact_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.artifact_ttl = ttl;
        self
    }
}

/// Errors that end a run.
///
/// Per-item problems never surface here; they are recorded on the job.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl PipelineError {
    /// Returns true when the failure was a storage outage.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Job(e) => e.is_unavailable(),
            Self::Store(e) => e.is_unavailable(),
            Self::Worker(_) => false,
        }
    }
}

/// Outcome of one run of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub job_id: JobId,
    /// Job status when the run ended.
    pub status: JobStatus,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Items another run had already recorded.
    pub already_handled: usize,
    /// Items left unmarked because storage stayed unavailable.
    pub deferred: usize,
    pub bytes_written: u64,
}

/// What happened to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemResult {
    Processed { bytes: u64 },
    Failed,
    Skipped,
    AlreadyHandled,
    /// The job stopped accepting items; the run must end.
    Stopped,
}

struct WorkItem {
    image_id: ImageId,
    attempts: u32,
}

/// Shared state of one run.
struct RunState {
    job_id: JobId,
    profile: OutputProfile,
    collection_id: Option<CollectionId>,
    skip_existing: bool,
    queue: Mutex<VecDeque<WorkItem>>,
    control: RunControl,
    processed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    already_handled: AtomicUsize,
    deferred: AtomicUsize,
    bytes_written: AtomicU64,
    stopped_elsewhere: AtomicBool,
}

impl RunState {
    fn new(job: &ProcessingJob, control: RunControl) -> Self {
        let queue = job
            .pending_items()
            .into_iter()
            .map(|image_id| WorkItem {
                image_id,
                attempts: 0,
            })
            .collect();

        Self {
            job_id: job.id,
            profile: job.profile.clone(),
            collection_id: job.scope.collection_id().cloned(),
            skip_existing: job.skip_existing,
            queue: Mutex::new(queue),
            control,
            processed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            already_handled: AtomicUsize::new(0),
            deferred: AtomicUsize::new(0),
            bytes_written: AtomicU64::new(0),
            stopped_elsewhere: AtomicBool::new(false),
        }
    }

    fn next_item(&self) -> Option<WorkItem> {
        self.queue.lock().pop_front()
    }

    fn requeue(&self, item: WorkItem) {
        self.queue.lock().push_back(item);
    }

    fn record(&self, result: ItemResult) {
        match result {
            ItemResult::Processed { bytes } => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
            }
            ItemResult::Failed => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            ItemResult::Skipped => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
            ItemResult::AlreadyHandled => {
                self.already_handled.fetch_add(1, Ordering::Relaxed);
            }
            ItemResult::Stopped => {}
        }
    }

    fn summary(&self, status: JobStatus) -> RunSummary {
        RunSummary {
            job_id: self.job_id,
            status,
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            already_handled: self.already_handled.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

/// Generates cache artifacts for processing jobs.
pub struct CacheGenerationPipeline<T> {
    tracker: JobStateTracker,
    folders: Arc<dyn CacheFolderStore>,
    artifacts: Arc<dyn ArtifactStore>,
    accountant: CacheSizeAccountant,
    allocator: CacheFolderAllocator,
    transform: Arc<T>,
    writer: ArtifactWriter,
    config: PipelineConfig,
}

impl<T> Clone for CacheGenerationPipeline<T> {
    fn clone(&self) -> Self {
        Self {
            tracker: self.tracker.clone(),
            folders: Arc::clone(&self.folders),
            artifacts: Arc::clone(&self.artifacts),
            accountant: self.accountant.clone(),
            allocator: self.allocator,
            transform: Arc::clone(&self.transform),
            writer: self.writer,
            config: self.config.clone(),
        }
    }
}

impl<T: ImageTransform> CacheGenerationPipeline<T> {
    pub fn new(
        tracker: JobStateTracker,
        folders: Arc<dyn CacheFolderStore>,
        artifacts: Arc<dyn ArtifactStore>,
        transform: Arc<T>,
    ) -> Self {
        Self {
            tracker,
            accountant: CacheSizeAccountant::new(Arc::clone(&folders)),
            folders,
            artifacts,
            allocator: CacheFolderAllocator::new(),
            transform,
            writer: ArtifactWriter::new(),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the job until its scope is consumed or `control` stops it.
    ///
    /// The job moves to Running first; this fails if the state machine does
    /// not allow it (for example a Completed job). Items already recorded by
    /// an earlier run are not processed again.
    pub async fn run(&self, job_id: &JobId, control: RunControl) -> Result<RunSummary, PipelineError> {
        let job = self.tracker.update_status(job_id, JobStatus::Running, None)?;
        let state = Arc::new(RunState::new(&job, control));
        let pending = state.queue.lock().len();

        info!(
            job_id = %job_id,
            job_type = %job.job_type,
            pending,
            total = job.progress.total,
            already_handled = job.progress.handled(),
            "Job run starting"
        );

        let workers = self.config.workers.min(pending).max(1);
        let mut set = JoinSet::new();
        for _ in 0..workers {
            let pipeline = self.clone();
            let state = Arc::clone(&state);
            set.spawn(async move { pipeline.worker(&state).await });
        }

        let mut fatal: Option<PipelineError> = None;
        while let Some(joined) = set.join_next().await {
            let err = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) => PipelineError::Worker(e.to_string()),
            };
            if fatal.is_none() {
                // Stop the remaining workers after their current item.
                state.control.token().cancel();
                fatal = Some(err);
            } else {
                warn!(job_id = %job_id, error = %err, "Additional worker failure");
            }
        }

        self.finish(&state, fatal)
    }

    async fn worker(&self, state: &RunState) -> Result<(), PipelineError> {
        loop {
            if state.control.is_stopped() {
                return Ok(());
            }
            let Some(mut item) = state.next_item() else {
                return Ok(());
            };

            match self.process_item(state, &item.image_id).await {
                Ok(result) => state.record(result),
                Err(e) if e.is_unavailable() => {
                    item.attempts += 1;
                    if item.attempts > self.config.storage_retry_attempts {
                        warn!(
                            job_id = %state.job_id,
                            image_id = %item.image_id,
                            attempts = item.attempts,
                            error = %e,
                            "Storage unavailable, leaving item for a later resume"
                        );
                        state.deferred.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }

                    debug!(
                        job_id = %state.job_id,
                        image_id = %item.image_id,
                        attempt = item.attempts,
                        "Storage unavailable, retrying item"
                    );
                    tokio::select! {
                        _ = state.control.token().cancelled() => {}
                        _ = tokio::time::sleep(self.config.storage_retry_delay) => {}
                    }
                    state.requeue(item);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn process_item(
        &self,
        state: &RunState,
        image_id: &ImageId,
    ) -> Result<ItemResult, PipelineError> {
        let job_id = &state.job_id;

        if self.tracker.is_already_handled(job_id, image_id)? {
            return Ok(ItemResult::AlreadyHandled);
        }

        if state.skip_existing && self.has_current_artifact(image_id, &state.profile).await? {
            let changed = self.tracker.mark_skipped(job_id, image_id)?;
            return self.settle(state, changed, ItemResult::Skipped);
        }

        let output = match self.transform.transform(image_id, &state.profile).await {
            Ok(output) => output,
            Err(e) => return self.fail(state, image_id, format!("transform: {}", e)),
        };
        let size = output.size_bytes();

        // Folders removed while this item was being placed are left out of
        // the next allocation.
        let mut removed: Vec<FolderId> = Vec::new();
        let (folder, path) = loop {
            let mut candidates = self.folders.list_active_folders()?;
            candidates.retain(|f| !removed.contains(&f.id));
            let folder = match self.allocator.allocate(&candidates, size) {
                Ok(id) => candidates.into_iter().find(|f| f.id == id),
                Err(e) => return self.fail(state, image_id, format!("capacity: {}", e)),
            };
            let Some(folder) = folder else {
                return self.fail(state, image_id, "capacity: allocated folder vanished".to_string());
            };

            let path = artifact_path(&folder.path, image_id, &state.profile);
            if let Err(e) = self.writer.write(&path, &output.bytes).await {
                return self.fail(state, image_id, format!("write: {}", e));
            }

            match self.accountant.increment(&folder.id, size) {
                Ok(_) => break (folder, path),
                Err(StoreError::NotFound { .. }) => {
                    warn!(
                        job_id = %job_id,
                        image_id = %image_id,
                        folder_id = %folder.id,
                        "Cache folder removed during placement, reallocating"
                    );
                    if let Err(e) = self.writer.remove(&path).await {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to remove orphaned artifact file"
                        );
                    }
                    removed.push(folder.id);
                }
                Err(e) => return Err(e.into()),
            }
        };

        let now = Utc::now();
        let artifact = CacheArtifact {
            id: ArtifactId::new(),
            image_id: image_id.clone(),
            collection_id: state.collection_id.clone(),
            profile_key: state.profile.key(),
            folder_id: folder.id,
            path,
            width: output.width,
            height: output.height,
            file_size_bytes: size,
            created_at: now,
            expires_at: self
                .config
                .artifact_ttl
                .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
                .and_then(|ttl| now.checked_add_signed(ttl)),
            is_valid: true,
        };

        let replaced = match self.artifacts.upsert_artifact(&artifact) {
            Ok(replaced) => replaced,
            Err(e) => {
                self.undo_increment(&folder.id, size);
                return Err(e.into());
            }
        };
        if let Some(old) = replaced {
            self.release_replaced(&old, &artifact).await;
        }

        let changed = self.tracker.mark_processed(job_id, image_id, size)?;
        debug!(
            job_id = %job_id,
            image_id = %image_id,
            folder_id = %folder.id,
            bytes = size,
            "Artifact generated"
        );
        self.settle(state, changed, ItemResult::Processed { bytes: size })
    }

    /// True if a valid, unexpired artifact for the profile exists on disk.
    async fn has_current_artifact(
        &self,
        image_id: &ImageId,
        profile: &OutputProfile,
    ) -> Result<bool, PipelineError> {
        match self.artifacts.find_artifact(image_id, &profile.key())? {
            Some(artifact) if !artifact.is_expired(Utc::now()) => {
                Ok(self.writer.exists(&artifact.path).await)
            }
            _ => Ok(false),
        }
    }

    fn fail(
        &self,
        state: &RunState,
        image_id: &ImageId,
        reason: String,
    ) -> Result<ItemResult, PipelineError> {
        warn!(job_id = %state.job_id, image_id = %image_id, reason = %reason, "Item failed");
        let changed = self.tracker.mark_failed(&state.job_id, image_id, reason)?;
        self.settle(state, changed, ItemResult::Failed)
    }

    /// Interprets the return value of an item mark.
    ///
    /// A mark that changed nothing means either another run recorded the
    /// item first or the job stopped accepting items outside this run.
    fn settle(
        &self,
        state: &RunState,
        changed: bool,
        result: ItemResult,
    ) -> Result<ItemResult, PipelineError> {
        if changed {
            return Ok(result);
        }

        let job = self.tracker.get(&state.job_id)?;
        if job.accepts_items() {
            return Ok(ItemResult::AlreadyHandled);
        }

        if !state.stopped_elsewhere.swap(true, Ordering::SeqCst) {
            warn!(
                job_id = %state.job_id,
                status = %job.status,
                "Job stopped outside this run, ending run"
            );
        }
        state.control.token().cancel();
        Ok(ItemResult::Stopped)
    }

    fn undo_increment(&self, folder_id: &FolderId, bytes: u64) {
        if let Err(e) = self.accountant.decrement(folder_id, bytes) {
            warn!(
                folder_id = %folder_id,
                bytes,
                error = %e,
                "Failed to roll back folder size, reconcile to correct"
            );
        }
    }

    /// Gives back the space of an artifact record that was just replaced.
    async fn release_replaced(&self, old: &CacheArtifact, new: &CacheArtifact) {
        if let Err(e) = self.accountant.decrement(&old.folder_id, old.file_size_bytes) {
            warn!(
                folder_id = %old.folder_id,
                bytes = old.file_size_bytes,
                error = %e,
                "Failed to release replaced artifact size, reconcile to correct"
            );
        }

        // Same path means the new file already overwrote the old one.
        if old.path != new.path {
            if let Err(e) = self.writer.remove(&old.path).await {
                warn!(
                    path = %old.path.display(),
                    error = %e,
                    "Failed to remove replaced artifact file"
                );
            }
        }
    }

    /// Moves the job to its final status for this run.
    fn finish(
        &self,
        state: &RunState,
        fatal: Option<PipelineError>,
    ) -> Result<RunSummary, PipelineError> {
        let job_id = &state.job_id;

        if let Some(err) = fatal {
            error!(job_id = %job_id, error = %err, "Job run aborted");
            if let Err(e) = self.tracker.transition(
                job_id,
                &[JobStatus::Running],
                JobStatus::Failed,
                Some(err.to_string()),
            ) {
                warn!(job_id = %job_id, error = %e, "Could not mark aborted job failed");
            }
            return Err(err);
        }

        let deferred = state.deferred.load(Ordering::Relaxed);
        let (target, message) = match state.control.stop_reason() {
            Some(StopReason::Cancel) => (JobStatus::Cancelled, None),
            Some(StopReason::Pause) => (JobStatus::Paused, None),
            None if state.stopped_elsewhere.load(Ordering::SeqCst) => {
                let job = self.tracker.get(job_id)?;
                return Ok(state.summary(job.status));
            }
            None => {
                let job = self.tracker.get(job_id)?;
                if deferred == 0 && job.progress.is_scope_consumed() {
                    (JobStatus::Completed, None)
                } else if deferred > 0 {
                    (
                        JobStatus::Paused,
                        Some(format!("{} items deferred: storage unavailable", deferred)),
                    )
                } else {
                    (
                        JobStatus::Paused,
                        Some(format!("{} items left unhandled", job.progress.remaining())),
                    )
                }
            }
        };

        let status = match self
            .tracker
            .transition(job_id, &[JobStatus::Running], target, message)
        {
            Ok(job) => job.status,
            Err(JobError::InvalidTransition { from, .. }) => {
                warn!(
                    job_id = %job_id,
                    expected = %target,
                    actual = %from,
                    "Job status changed outside this run, leaving it"
                );
                from
            }
            Err(e) => return Err(e.into()),
        };

        let summary = state.summary(status);
        info!(
            job_id = %job_id,
            status = %status,
            processed = summary.processed,
            failed = summary.failed,
            skipped = summary.skipped,
            deferred = summary.deferred,
            bytes = summary.bytes_written,
            "Job run finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use tempfile::TempDir;

    use crate::folders::{CacheFolder, FolderUpdate, NewCacheFolder};
    use crate::jobs::{JobScope, JobType};
    use crate::pipeline::transform::{TransformError, TransformOutput};
    use crate::store::{MemoryStore, StoreResult};

    /// Produces fixed-size output and records every call.
    struct FakeTransform {
        size: usize,
        failing: HashSet<ImageId>,
        calls: Mutex<Vec<ImageId>>,
        cancel_on: Option<(ImageId, RunControl)>,
        outage_on: Option<(ImageId, Arc<MemoryStore>)>,
    }

    impl FakeTransform {
        fn new(size: usize) -> Self {
            Self {
                size,
                failing: HashSet::new(),
                calls: Mutex::new(Vec::new()),
                cancel_on: None,
                outage_on: None,
            }
        }

        fn failing(mut self, id: &str) -> Self {
            self.failing.insert(ImageId::from(id));
            self
        }

        fn calls(&self) -> Vec<ImageId> {
            self.calls.lock().clone()
        }
    }

    impl ImageTransform for FakeTransform {
        async fn transform(
            &self,
            image_id: &ImageId,
            _profile: &OutputProfile,
        ) -> Result<TransformOutput, TransformError> {
            self.calls.lock().push(image_id.clone());

            if let Some((id, store)) = &self.outage_on {
                if id == image_id {
                    store.fail_next(1);
                }
            }
            if let Some((id, control)) = &self.cancel_on {
                if id == image_id {
                    control.cancel();
                }
            }
            if self.failing.contains(image_id) {
                return Err(TransformError::Decode("corrupt header".into()));
            }
            Ok(TransformOutput {
                bytes: vec![7; self.size],
                width: 8,
                height: 8,
            })
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: Arc<MemoryStore>,
        tracker: JobStateTracker,
        folder: CacheFolder,
    }

    fn fixture(max_size: Option<u64>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut request = NewCacheFolder::new("primary", dir.path(), 1);
        if let Some(max) = max_size {
            request = request.with_max_size(max);
        }
        let folder = CacheFolder::new(request);
        store.insert_folder(&folder).unwrap();

        Fixture {
            _dir: dir,
            tracker: JobStateTracker::new(store.clone()),
            store,
            folder,
        }
    }

    impl Fixture {
        fn job(&self, ids: &[&str]) -> JobId {
            let job = ProcessingJob::new(
                JobType::Cache,
                JobScope::images(ids.iter().map(|s| ImageId::from(*s))),
                OutputProfile::cache_default(),
            );
            self.tracker.create(&job).unwrap();
            job.id
        }

        fn pipeline(&self, transform: FakeTransform, workers: usize) -> CacheGenerationPipeline<FakeTransform> {
            CacheGenerationPipeline::new(
                self.tracker.clone(),
                self.store.clone(),
                self.store.clone(),
                Arc::new(transform),
            )
            .with_config(
                PipelineConfig::default()
                    .with_workers(workers)
                    .with_storage_retry(0, Duration::from_millis(1)),
            )
        }

        fn folder_size(&self) -> (u64, u64) {
            let folder = self.store.get_folder(&self.folder.id).unwrap().unwrap();
            (folder.current_size_bytes, folder.total_files)
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Completion
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_run_processes_every_item() {
        let fx = fixture(None);
        let id = fx.job(&["a", "b", "c"]);
        let pipeline = fx.pipeline(FakeTransform::new(100), 2);

        let summary = pipeline.run(&id, RunControl::new()).await.unwrap();

        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.bytes_written, 300);
        assert_eq!(fx.folder_size(), (300, 3));

        let job = fx.tracker.get(&id).unwrap();
        assert_eq!(job.progress.completed, 3);
        assert!(!job.can_resume);
        assert_eq!(fx.store.artifacts_in_folder(&fx.folder.id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_transform_failure_is_per_item() {
        let fx = fixture(None);
        let id = fx.job(&["a", "b", "c"]);
        let pipeline = fx.pipeline(FakeTransform::new(10).failing("b"), 2);

        let summary = pipeline.run(&id, RunControl::new()).await.unwrap();

        assert_eq!(summary.status, JobStatus::Completed);
        let job = fx.tracker.get(&id).unwrap();
        assert_eq!(job.progress.completed, 2);
        assert_eq!(job.progress.failed, 1);
        assert!(job.item_errors[&ImageId::from("b")].starts_with("transform:"));
        assert_eq!(fx.folder_size(), (20, 2));
    }

    #[tokio::test]
    async fn test_all_items_failing_still_completes() {
        let fx = fixture(None);
        let id = fx.job(&["a", "b"]);
        let pipeline = fx.pipeline(FakeTransform::new(10).failing("a").failing("b"), 1);

        let summary = pipeline.run(&id, RunControl::new()).await.unwrap();

        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(fx.tracker.get(&id).unwrap().progress.failed, 2);
    }

    #[tokio::test]
    async fn test_no_capacity_fails_item() {
        let fx = fixture(Some(150));
        let id = fx.job(&["a", "b"]);
        let pipeline = fx.pipeline(FakeTransform::new(100), 1);

        pipeline.run(&id, RunControl::new()).await.unwrap();

        let job = fx.tracker.get(&id).unwrap();
        assert_eq!(job.progress.completed, 1);
        assert_eq!(job.progress.failed, 1);
        assert!(job
            .item_errors
            .values()
            .all(|reason| reason.starts_with("capacity:")));
        assert_eq!(fx.folder_size(), (100, 1));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Resume and stop
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_resume_processes_only_pending_items() {
        let fx = fixture(None);
        let id = fx.job(&["a", "b", "c"]);
        fx.tracker.update_status(&id, JobStatus::Running, None).unwrap();
        fx.tracker.mark_processed(&id, &ImageId::from("a"), 5).unwrap();
        fx.tracker.mark_processed(&id, &ImageId::from("b"), 5).unwrap();
        fx.tracker.update_status(&id, JobStatus::Paused, None).unwrap();

        let pipeline = fx.pipeline(FakeTransform::new(10), 2);
        let summary = pipeline.run(&id, RunControl::new()).await.unwrap();

        assert_eq!(pipeline.transform.calls(), vec![ImageId::from("c")]);
        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(fx.tracker.get(&id).unwrap().progress.completed, 3);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_preserves_progress() {
        let fx = fixture(None);
        let id = fx.job(&["a", "b", "c", "d"]);
        let control = RunControl::new();
        let mut transform = FakeTransform::new(10);
        transform.cancel_on = Some((ImageId::from("b"), control.clone()));
        let pipeline = fx.pipeline(transform, 1);

        let summary = pipeline.run(&id, control).await.unwrap();

        assert_eq!(summary.status, JobStatus::Cancelled);
        assert_eq!(summary.processed, 2);
        let job = fx.tracker.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.progress.completed, 2);
        assert!(job.can_resume);

        let resumed = fx
            .pipeline(FakeTransform::new(10), 1)
            .run(&id, RunControl::new())
            .await
            .unwrap();
        assert_eq!(resumed.processed, 2);
        assert_eq!(resumed.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_pause_signal_ends_paused() {
        let fx = fixture(None);
        let id = fx.job(&["a", "b"]);
        let control = RunControl::new();
        control.pause();

        let summary = fx
            .pipeline(FakeTransform::new(10), 1)
            .run(&id, control)
            .await
            .unwrap();

        assert_eq!(summary.status, JobStatus::Paused);
        assert_eq!(summary.processed, 0);
    }

    #[tokio::test]
    async fn test_completed_job_cannot_run_again() {
        let fx = fixture(None);
        let id = fx.job(&["a"]);
        let pipeline = fx.pipeline(FakeTransform::new(10), 1);
        pipeline.run(&id, RunControl::new()).await.unwrap();

        assert!(matches!(
            pipeline.run(&id, RunControl::new()).await,
            Err(PipelineError::Job(JobError::InvalidTransition { .. }))
        ));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Storage outages and regeneration
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_storage_outage_defers_item_and_pauses() {
        let fx = fixture(None);
        let id = fx.job(&["a", "b", "c"]);
        let mut transform = FakeTransform::new(10);
        transform.outage_on = Some((ImageId::from("b"), fx.store.clone()));
        let pipeline = fx.pipeline(transform, 1);

        let summary = pipeline.run(&id, RunControl::new()).await.unwrap();

        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.status, JobStatus::Paused);
        let job = fx.tracker.get(&id).unwrap();
        assert!(!job.is_handled(&ImageId::from("b")));
        assert_eq!(job.progress.failed, 0);

        let resumed = fx
            .pipeline(FakeTransform::new(10), 1)
            .run(&id, RunControl::new())
            .await
            .unwrap();
        assert_eq!(resumed.processed, 1);
        assert_eq!(resumed.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_regeneration_replaces_accounting() {
        let fx = fixture(None);
        let first = fx.job(&["a"]);
        fx.pipeline(FakeTransform::new(100), 1)
            .run(&first, RunControl::new())
            .await
            .unwrap();

        let second = fx.job(&["a"]);
        fx.pipeline(FakeTransform::new(40), 1)
            .run(&second, RunControl::new())
            .await
            .unwrap();

        assert_eq!(fx.folder_size(), (40, 1));
        assert_eq!(fx.store.artifacts_in_folder(&fx.folder.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_skip_existing() {
        let fx = fixture(None);
        let first = fx.job(&["a"]);
        fx.pipeline(FakeTransform::new(10), 1)
            .run(&first, RunControl::new())
            .await
            .unwrap();

        let job = ProcessingJob::new(
            JobType::Cache,
            JobScope::images([ImageId::from("a"), ImageId::from("b")]),
            OutputProfile::cache_default(),
        )
        .with_skip_existing(true);
        fx.tracker.create(&job).unwrap();

        let pipeline = fx.pipeline(FakeTransform::new(10), 1);
        let summary = pipeline.run(&job.id, RunControl::new()).await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.processed, 1);
        assert_eq!(pipeline.transform.calls(), vec![ImageId::from("b")]);
        assert_eq!(fx.tracker.get(&job.id).unwrap().progress.skipped, 1);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Folder removed during a run
    // ─────────────────────────────────────────────────────────────────────────

    /// Folder store that deletes one folder right after first listing it.
    struct VanishingFolders {
        inner: Arc<MemoryStore>,
        doomed: FolderId,
        dropped: AtomicBool,
    }

    impl CacheFolderStore for VanishingFolders {
        fn insert_folder(&self, folder: &CacheFolder) -> StoreResult<()> {
            self.inner.insert_folder(folder)
        }

        fn get_folder(&self, id: &FolderId) -> StoreResult<Option<CacheFolder>> {
            self.inner.get_folder(id)
        }

        fn list_folders(&self) -> StoreResult<Vec<CacheFolder>> {
            self.inner.list_folders()
        }

        fn list_active_folders(&self) -> StoreResult<Vec<CacheFolder>> {
            let folders = self.inner.list_active_folders()?;
            if !self.dropped.swap(true, Ordering::SeqCst) {
                self.inner.delete_folder(&self.doomed)?;
            }
            Ok(folders)
        }

        fn update_folder(&self, id: &FolderId, update: &FolderUpdate) -> StoreResult<CacheFolder> {
            self.inner.update_folder(id, update)
        }

        fn delete_folder(&self, id: &FolderId) -> StoreResult<bool> {
            self.inner.delete_folder(id)
        }

        fn increment_size(&self, id: &FolderId, bytes: u64, files: u64) -> StoreResult<u64> {
            self.inner.increment_size(id, bytes, files)
        }

        fn decrement_size(&self, id: &FolderId, bytes: u64, files: u64) -> StoreResult<u64> {
            self.inner.decrement_size(id, bytes, files)
        }

        fn set_size(&self, id: &FolderId, bytes: u64, files: u64) -> StoreResult<()> {
            self.inner.set_size(id, bytes, files)
        }
    }

    #[tokio::test]
    async fn test_folder_removed_mid_run_reallocates() {
        let fx = fixture(None);
        let spare_dir = TempDir::new().unwrap();
        let spare = CacheFolder::new(NewCacheFolder::new("two", spare_dir.path(), 2));
        fx.store.insert_folder(&spare).unwrap();
        let id = fx.job(&["a", "b", "c"]);

        let folders: Arc<dyn CacheFolderStore> = Arc::new(VanishingFolders {
            inner: fx.store.clone(),
            doomed: fx.folder.id,
            dropped: AtomicBool::new(false),
        });
        let pipeline = CacheGenerationPipeline::new(
            fx.tracker.clone(),
            folders,
            fx.store.clone(),
            Arc::new(FakeTransform::new(10)),
        )
        .with_config(PipelineConfig::default().with_workers(1));

        let summary = pipeline.run(&id, RunControl::new()).await.unwrap();

        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(summary.processed, 3);
        let job = fx.tracker.get(&id).unwrap();
        assert_eq!(job.progress.completed, 3);
        assert_eq!(job.progress.failed, 0);

        let stored = fx.store.get_folder(&spare.id).unwrap().unwrap();
        assert_eq!((stored.current_size_bytes, stored.total_files), (30, 3));
        assert_eq!(fx.store.artifacts_in_folder(&spare.id).unwrap().len(), 3);

        let orphan = artifact_path(
            &fx.folder.path,
            &ImageId::from("a"),
            &OutputProfile::cache_default(),
        );
        assert!(!orphan.exists());
    }
}
