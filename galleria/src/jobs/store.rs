//! Persistence contract for processing jobs.

use chrono::{DateTime, Utc};

use crate::ids::{ImageId, JobId};
use crate::jobs::types::{ItemOutcome, JobStatus, ProcessingJob, StatusChange, TransitionOutcome};
use crate::store::StoreResult;

/// Persisted processing job records.
///
/// Every mutation of an existing job goes through one of the conditional
/// operations below, each indivisible at the storage layer. Callers never
/// load a job, modify it and save it back.
pub trait JobStateStore: Send + Sync {
    /// Inserts a new job. Fails with `Conflict` if the id already exists.
    fn insert_job(&self, job: &ProcessingJob) -> StoreResult<()>;

    fn get_job(&self, id: &JobId) -> StoreResult<Option<ProcessingJob>>;

    /// Lists jobs, newest first, optionally filtered by status.
    fn list_jobs(&self, status: Option<JobStatus>) -> StoreResult<Vec<ProcessingJob>>;

    /// Records an item outcome if the item has none yet.
    ///
    /// The membership check, the set insertion, the counter increment and the
    /// heartbeat refresh happen as one indivisible operation. Returns true if
    /// state changed. Returns false without error when the item was already
    /// handled or the job is terminal. Fails with `NotFound` for unknown jobs.
    fn record_item(
        &self,
        id: &JobId,
        image_id: &ImageId,
        outcome: &ItemOutcome,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Returns true if the item has a recorded outcome.
    fn is_item_handled(&self, id: &JobId, image_id: &ImageId) -> StoreResult<bool>;

    /// Compare-and-swap on job status.
    ///
    /// Applies `change` only if the current status is in `from` and the state
    /// machine permits it; otherwise reports the current status.
    fn transition_job(
        &self,
        id: &JobId,
        from: &[JobStatus],
        change: &StatusChange,
    ) -> StoreResult<TransitionOutcome>;

    /// Flips a Running job whose heartbeat precedes `cutoff` to `change.to`.
    ///
    /// The condition is evaluated atomically with the update, so a worker
    /// recording progress concurrently wins. Per-item sets are not touched.
    /// Returns true if the job was flipped.
    fn flip_stale_job(
        &self,
        id: &JobId,
        cutoff: DateTime<Utc>,
        change: &StatusChange,
    ) -> StoreResult<bool>;

    /// Lists Running jobs whose heartbeat precedes `cutoff`.
    fn list_stale_jobs(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<ProcessingJob>>;

    /// Deletes terminal jobs last updated before `cutoff`. Returns the count.
    fn delete_terminal_jobs_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}
