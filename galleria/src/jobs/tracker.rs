//! Job state tracking.
//!
//! [`JobStateTracker`] is the only writer of job records. Per-item marks are
//! idempotent: recording the same item twice, from the same run or from a
//! resumed one, changes nothing the second time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ids::{ImageId, JobId};
use crate::jobs::{
    ItemOutcome, JobStateStore, JobStatus, ProcessingJob, StatusChange, TransitionOutcome,
};
use crate::store::StoreError;

/// Errors from job state operations.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job scope is empty")]
    EmptyScope,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl JobError {
    /// Returns true when the store was unreachable and nothing was recorded.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_unavailable())
    }

    fn from_store(id: &JobId, err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(*id),
            other => Self::Store(other),
        }
    }
}

/// Records per-item progress and status changes of processing jobs.
#[derive(Clone)]
pub struct JobStateTracker {
    store: Arc<dyn JobStateStore>,
}

impl JobStateTracker {
    pub fn new(store: Arc<dyn JobStateStore>) -> Self {
        Self { store }
    }

    /// Persists a new job.
    pub fn create(&self, job: &ProcessingJob) -> Result<(), JobError> {
        self.store.insert_job(job)?;
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            total = job.progress.total,
            profile = %job.profile.key(),
            "Job created"
        );
        Ok(())
    }

    pub fn get(&self, id: &JobId) -> Result<ProcessingJob, JobError> {
        self.store.get_job(id)?.ok_or(JobError::NotFound(*id))
    }

    pub fn list(&self, status: Option<JobStatus>) -> Result<Vec<ProcessingJob>, JobError> {
        Ok(self.store.list_jobs(status)?)
    }

    /// Records a successfully generated item.
    ///
    /// Returns false if the item is outside the job's scope, already had an
    /// outcome, or the job no longer accepts items.
    pub fn mark_processed(
        &self,
        id: &JobId,
        image_id: &ImageId,
        size_bytes: u64,
    ) -> Result<bool, JobError> {
        self.record(id, image_id, ItemOutcome::Processed { size_bytes })
    }

    /// Records a failed item with its reason.
    pub fn mark_failed(
        &self,
        id: &JobId,
        image_id: &ImageId,
        reason: impl Into<String>,
    ) -> Result<bool, JobError> {
        self.record(
            id,
            image_id,
            ItemOutcome::Failed {
                reason: reason.into(),
            },
        )
    }

    /// Records an item that needed no work.
    pub fn mark_skipped(&self, id: &JobId, image_id: &ImageId) -> Result<bool, JobError> {
        self.record(id, image_id, ItemOutcome::Skipped)
    }

    /// Returns true if the item already has a recorded outcome.
    pub fn is_already_handled(&self, id: &JobId, image_id: &ImageId) -> Result<bool, JobError> {
        self.store
            .is_item_handled(id, image_id)
            .map_err(|e| JobError::from_store(id, e))
    }

    fn record(&self, id: &JobId, image_id: &ImageId, outcome: ItemOutcome) -> Result<bool, JobError> {
        let changed = self
            .store
            .record_item(id, image_id, &outcome, Utc::now())
            .map_err(|e| JobError::from_store(id, e))?;

        if changed {
            debug!(job_id = %id, image_id = %image_id, outcome = outcome.kind(), "Item recorded");
        } else {
            debug!(job_id = %id, image_id = %image_id, "Item already handled, mark ignored");
        }
        Ok(changed)
    }

    /// Moves the job to `status` from any state the state machine allows.
    pub fn update_status(
        &self,
        id: &JobId,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<ProcessingJob, JobError> {
        self.transition(id, status.allowed_predecessors(), status, error_message)
    }

    /// Moves the job to `status` only if it currently is in one of `from`.
    pub fn transition(
        &self,
        id: &JobId,
        from: &[JobStatus],
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<ProcessingJob, JobError> {
        let mut change = StatusChange::new(status);
        change.error_message = error_message;

        match self
            .store
            .transition_job(id, from, &change)
            .map_err(|e| JobError::from_store(id, e))?
        {
            TransitionOutcome::Applied(job) => {
                info!(
                    job_id = %id,
                    status = %job.status,
                    completed = job.progress.completed,
                    failed = job.progress.failed,
                    skipped = job.progress.skipped,
                    total = job.progress.total,
                    "Job status changed"
                );
                Ok(job)
            }
            TransitionOutcome::Rejected { current } => Err(JobError::InvalidTransition {
                id: *id,
                from: current,
                to: status,
            }),
        }
    }

    /// Running jobs whose heartbeat is older than `stale_after`.
    pub fn list_stale(&self, stale_after: Duration) -> Result<Vec<ProcessingJob>, JobError> {
        Ok(self.store.list_stale_jobs(cutoff(stale_after))?)
    }

    /// Flips a job that is still stale at `stale_after` to `change.to`.
    ///
    /// Returns false if the job made progress, stopped or vanished since it
    /// was listed.
    pub fn flip_stale(
        &self,
        id: &JobId,
        stale_after: Duration,
        change: &StatusChange,
    ) -> Result<bool, JobError> {
        let flipped = self.store.flip_stale_job(id, cutoff(stale_after), change)?;
        if flipped {
            warn!(job_id = %id, status = %change.to, "Stale job flipped");
        }
        Ok(flipped)
    }

    /// Deletes terminal jobs that last changed more than `older_than` ago.
    pub fn purge_terminal_jobs(&self, older_than: Duration) -> Result<usize, JobError> {
        let purged = self.store.delete_terminal_jobs_before(cutoff(older_than))?;
        if purged > 0 {
            info!(purged, older_than_secs = older_than.as_secs(), "Purged old jobs");
        }
        Ok(purged)
    }
}

/// The instant `age` before now.
fn cutoff(age: Duration) -> chrono::DateTime<Utc> {
    let age = chrono::Duration::from_std(age)
        .unwrap_or_else(|_| chrono::Duration::days(365 * 1_000));
    Utc::now()
        .checked_sub_signed(age)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC)
}
