//! Background sweep for stale jobs, old job records and expired artifacts.
//!
//! A job is stale when it is Running but has recorded no progress for
//! longer than the liveness timeout, typically because the process running
//! it died. The sweeper flips such jobs so they are visibly stopped and can
//! be resumed.
//!
//! # Example
//!
//! ```ignore
//! use galleria::jobs::{StaleJobSweeper, StalePolicy};
//!
//! let sweeper = StaleJobSweeper::new(tracker)
//!     .with_stale_after(Duration::from_secs(300))
//!     .with_policy(StalePolicy::Pause);
//!
//! tokio::spawn(sweeper.run(shutdown_token));
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artifacts::{ArtifactJanitor, JanitorReport};
use crate::jobs::runs::ActiveRuns;
use crate::jobs::tracker::{JobError, JobStateTracker};
use crate::jobs::{JobStatus, StatusChange};

/// Default liveness timeout (5 minutes).
pub const DEFAULT_STALE_AFTER_SECS: u64 = 300;

/// Default interval between sweeps (60 seconds).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// What a stale job becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePolicy {
    /// Mark Failed with a timeout reason. Progress is kept and the job stays
    /// resumable.
    #[default]
    Fail,
    /// Mark Paused.
    Pause,
}

impl StalePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Pause => "pause",
        }
    }

    fn status(&self) -> JobStatus {
        match self {
            Self::Fail => JobStatus::Failed,
            Self::Pause => JobStatus::Paused,
        }
    }
}

impl fmt::Display for StalePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StalePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" | "failed" => Ok(Self::Fail),
            "pause" | "paused" => Ok(Self::Pause),
            other => Err(format!("unknown stale policy '{}'", other)),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale jobs flipped by this sweep.
    pub flipped: usize,
    /// Stale jobs left alone because a run in this process still owns them.
    pub skipped_active: usize,
    /// Terminal jobs deleted by retention.
    pub purged: usize,
    /// Expired artifacts removed, when a janitor is attached.
    pub expired: Option<JanitorReport>,
}

/// Periodic sweeper for stale jobs.
pub struct StaleJobSweeper {
    tracker: JobStateTracker,
    stale_after: Duration,
    interval: Duration,
    policy: StalePolicy,
    retention: Option<Duration>,
    runs: Option<ActiveRuns>,
    janitor: Option<ArtifactJanitor>,
}

impl StaleJobSweeper {
    pub fn new(tracker: JobStateTracker) -> Self {
        Self {
            tracker,
            stale_after: Duration::from_secs(DEFAULT_STALE_AFTER_SECS),
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            policy: StalePolicy::default(),
            retention: None,
            runs: None,
            janitor: None,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_policy(mut self, policy: StalePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Deletes terminal jobs older than `retention` on every sweep.
    pub fn with_retention(mut self, retention: Option<Duration>) -> Self {
        self.retention = retention;
        self
    }

    /// Jobs with a run registered here are never considered stale.
    pub fn with_active_runs(mut self, runs: ActiveRuns) -> Self {
        self.runs = Some(runs);
        self
    }

    /// Also purges expired and invalidated artifacts on every sweep.
    pub fn with_janitor(mut self, janitor: ArtifactJanitor) -> Self {
        self.janitor = Some(janitor);
        self
    }

    pub fn policy(&self) -> StalePolicy {
        self.policy
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Flips every stale job according to the policy.
    pub fn sweep_stale(&self) -> Result<(usize, usize), JobError> {
        let mut flipped = 0;
        let mut skipped_active = 0;

        for job in self.tracker.list_stale(self.stale_after)? {
            if self.runs.as_ref().is_some_and(|runs| runs.contains(&job.id)) {
                debug!(job_id = %job.id, "Stale job still owned by a local run");
                skipped_active += 1;
                continue;
            }

            let change = StatusChange::new(self.policy.status()).with_error(format!(
                "no progress for {}s; presumed abandoned",
                self.stale_after.as_secs()
            ));
            if self.tracker.flip_stale(&job.id, self.stale_after, &change)? {
                flipped += 1;
            }
        }

        Ok((flipped, skipped_active))
    }

    /// Runs one full sweep: stale jobs, retention and expired artifacts.
    pub async fn sweep_once(&self) -> Result<SweepReport, JobError> {
        let (flipped, skipped_active) = self.sweep_stale()?;

        let purged = match self.retention {
            Some(retention) => self.tracker.purge_terminal_jobs(retention)?,
            None => 0,
        };

        let expired = match &self.janitor {
            Some(janitor) => Some(janitor.purge_expired(Utc::now()).await?),
            None => None,
        };

        Ok(SweepReport {
            flipped,
            skipped_active,
            purged,
            expired,
        })
    }

    /// Runs the sweeper until shutdown is signalled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            stale_after_secs = self.stale_after.as_secs(),
            policy = %self.policy,
            retention_secs = self.retention.map(|r| r.as_secs()),
            "Job sweeper starting"
        );

        let mut interval = tokio::time::interval(self.interval);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Job sweeper shutting down");
                    break;
                }

                _ = interval.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if report.flipped > 0 || report.purged > 0 => {
                            info!(
                                flipped = report.flipped,
                                purged = report.purged,
                                "Sweep finished"
                            );
                        }
                        Ok(report) => {
                            debug!(skipped_active = report.skipped_active, "Nothing to sweep");
                        }
                        Err(e) => {
                            warn!(error = %e, "Sweep failed, retrying next interval");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::ids::ImageId;
    use crate::jobs::{JobScope, JobType, OutputProfile, ProcessingJob};
    use crate::store::MemoryStore;

    fn running_job(tracker: &JobStateTracker) -> ProcessingJob {
        let job = ProcessingJob::new(
            JobType::Cache,
            JobScope::images(["a", "b"].into_iter().map(ImageId::from)),
            OutputProfile::cache_default(),
        );
        tracker.create(&job).unwrap();
        tracker
            .update_status(&job.id, JobStatus::Running, None)
            .unwrap()
    }

    fn tracker() -> JobStateTracker {
        JobStateTracker::new(Arc::new(MemoryStore::new()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_defaults() {
        let sweeper = StaleJobSweeper::new(tracker());
        assert_eq!(sweeper.stale_after().as_secs(), DEFAULT_STALE_AFTER_SECS);
        assert_eq!(sweeper.interval.as_secs(), DEFAULT_SWEEP_INTERVAL_SECS);
        assert_eq!(sweeper.policy(), StalePolicy::Fail);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("pause".parse::<StalePolicy>().unwrap(), StalePolicy::Pause);
        assert_eq!(" Fail ".parse::<StalePolicy>().unwrap(), StalePolicy::Fail);
        assert!("retry".parse::<StalePolicy>().is_err());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sweeping
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_stale_job_is_failed_with_progress_kept() {
        let tracker = tracker();
        let job = running_job(&tracker);
        tracker
            .mark_processed(&job.id, &ImageId::from("a"), 10)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let sweeper = StaleJobSweeper::new(tracker.clone()).with_stale_after(Duration::ZERO);
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.flipped, 1);

        let job = tracker.get(&job.id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.can_resume);
        assert_eq!(job.progress.completed, 1);
        assert!(job.error_message.is_some());
    }

    #[tokio::test]
    async fn test_pause_policy() {
        let tracker = tracker();
        let job = running_job(&tracker);
        tokio::time::sleep(Duration::from_millis(5)).await;

        StaleJobSweeper::new(tracker.clone())
            .with_stale_after(Duration::ZERO)
            .with_policy(StalePolicy::Pause)
            .sweep_once()
            .await
            .unwrap();

        assert_eq!(tracker.get(&job.id).unwrap().status, JobStatus::Paused);
    }

    #[tokio::test]
    async fn test_fresh_job_is_left_alone() {
        let tracker = tracker();
        let job = running_job(&tracker);

        let report = StaleJobSweeper::new(tracker.clone())
            .sweep_once()
            .await
            .unwrap();

        assert_eq!(report.flipped, 0);
        assert_eq!(tracker.get(&job.id).unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_locally_active_job_is_skipped() {
        let tracker = tracker();
        let job = running_job(&tracker);
        let runs = ActiveRuns::new();
        let _run = runs.register(job.id).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = StaleJobSweeper::new(tracker.clone())
            .with_stale_after(Duration::ZERO)
            .with_active_runs(runs)
            .sweep_once()
            .await
            .unwrap();

        assert_eq!(report.flipped, 0);
        assert_eq!(report.skipped_active, 1);
        assert_eq!(tracker.get(&job.id).unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_retention_purges_terminal_jobs() {
        let tracker = tracker();
        let job = running_job(&tracker);
        tracker
            .update_status(&job.id, JobStatus::Cancelled, None)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = StaleJobSweeper::new(tracker.clone())
            .with_retention(Some(Duration::ZERO))
            .sweep_once()
            .await
            .unwrap();

        assert_eq!(report.purged, 1);
        assert!(tracker.get(&job.id).is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let sweeper = StaleJobSweeper::new(tracker()).with_interval(Duration::from_millis(10));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(sweeper.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}
