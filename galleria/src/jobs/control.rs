//! Job control API: submit, inspect, cancel and pause jobs.
//!
//! Clients poll [`JobControl::status`]; nothing is pushed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::ids::{ImageId, JobId};
use crate::jobs::runs::ActiveRuns;
use crate::jobs::tracker::{JobError, JobStateTracker};
use crate::jobs::{JobProgress, JobScope, JobStatus, JobType, OutputProfile, ProcessingJob};

/// Request to create a job.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_type: JobType,
    pub scope: JobScope,
    /// Defaults to the job type's standard profile.
    pub profile: Option<OutputProfile>,
    /// Skip items whose artifact already exists on disk.
    pub skip_existing: bool,
}

impl JobRequest {
    pub fn new(job_type: JobType, scope: JobScope) -> Self {
        Self {
            job_type,
            scope,
            profile: None,
            skip_existing: false,
        }
    }

    pub fn with_profile(mut self, profile: OutputProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }

    fn resolved_profile(&self) -> OutputProfile {
        self.profile.clone().unwrap_or_else(|| match self.job_type {
            JobType::Cache => OutputProfile::cache_default(),
            JobType::Thumbnail => OutputProfile::thumbnail_default(),
        })
    }
}

/// A failed item and its reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub image_id: ImageId,
    pub reason: String,
}

/// Point-in-time view of a job for polling clients.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub id: JobId,
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub errors: Vec<ItemError>,
    pub can_resume: bool,
    pub error_message: Option<String>,
    /// True if a run of this job is executing in this process.
    pub active_here: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_progress_at: Option<DateTime<Utc>>,
}

impl JobStatusReport {
    fn from_job(job: ProcessingJob, active_here: bool) -> Self {
        let errors = job
            .item_errors
            .into_iter()
            .map(|(image_id, reason)| ItemError { image_id, reason })
            .collect();
        Self {
            id: job.id,
            job_type: job.job_type,
            status: job.status,
            progress: job.progress,
            errors,
            can_resume: job.can_resume,
            error_message: job.error_message,
            active_here,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            last_progress_at: job.last_progress_at,
        }
    }
}

/// Acknowledgement of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAck {
    /// A run in this process was signalled; it stops after in-flight items.
    Signalled,
    /// No run was active here; the new status was persisted directly.
    Applied(JobStatus),
}

/// Entry point for job clients.
#[derive(Clone)]
pub struct JobControl {
    tracker: JobStateTracker,
    runs: ActiveRuns,
}

impl JobControl {
    pub fn new(tracker: JobStateTracker, runs: ActiveRuns) -> Self {
        Self { tracker, runs }
    }

    /// Creates a Pending job and returns its id.
    pub fn submit(&self, request: JobRequest) -> Result<JobId, JobError> {
        if request.scope.is_empty() {
            return Err(JobError::EmptyScope);
        }
        let job = ProcessingJob::new(request.job_type, request.scope.clone(), request.resolved_profile())
            .with_skip_existing(request.skip_existing);
        self.tracker.create(&job)?;
        Ok(job.id)
    }

    pub fn status(&self, id: &JobId) -> Result<JobStatusReport, JobError> {
        let job = self.tracker.get(id)?;
        Ok(JobStatusReport::from_job(job, self.runs.contains(id)))
    }

    /// Lists jobs, newest first.
    pub fn list(&self, status: Option<JobStatus>) -> Result<Vec<JobStatusReport>, JobError> {
        Ok(self
            .tracker
            .list(status)?
            .into_iter()
            .map(|job| {
                let active = self.runs.contains(&job.id);
                JobStatusReport::from_job(job, active)
            })
            .collect())
    }

    /// Cancels a job, keeping all recorded progress.
    pub fn cancel(&self, id: &JobId) -> Result<ControlAck, JobError> {
        if let Some(run) = self.runs.get(id) {
            run.cancel();
            info!(job_id = %id, "Cancellation requested");
            return Ok(ControlAck::Signalled);
        }
        let job = self.tracker.update_status(id, JobStatus::Cancelled, None)?;
        Ok(ControlAck::Applied(job.status))
    }

    /// Pauses a job so it can be resumed later.
    pub fn pause(&self, id: &JobId) -> Result<ControlAck, JobError> {
        if let Some(run) = self.runs.get(id) {
            run.pause();
            info!(job_id = %id, "Pause requested");
            return Ok(ControlAck::Signalled);
        }
        let job = self.tracker.update_status(id, JobStatus::Paused, None)?;
        Ok(ControlAck::Applied(job.status))
    }

    /// Checks that a job may be started or resumed.
    pub fn check_runnable(&self, id: &JobId) -> Result<ProcessingJob, JobError> {
        let job = self.tracker.get(id)?;
        if !job.accepts_transition(JobStatus::Running.allowed_predecessors(), JobStatus::Running) {
            return Err(JobError::InvalidTransition {
                id: *id,
                from: job.status,
                to: JobStatus::Running,
            });
        }
        Ok(job)
    }

    pub fn tracker(&self) -> &JobStateTracker {
        &self.tracker
    }

    pub fn active_runs(&self) -> &ActiveRuns {
        &self.runs
    }
}
