//! Galleria service facade implementation.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::error::ServiceError;
use crate::artifacts::ArtifactJanitor;
use crate::config::ConfigFile;
use crate::folders::{CacheFolderAdmin, CacheSizeAccountant, Reconciliation};
use crate::ids::{FolderId, JobId};
use crate::jobs::{
    ActiveRuns, ControlAck, JobControl, JobRequest, JobStateTracker, JobStatus, JobStatusReport,
    RunControl, StaleJobSweeper, StalePolicy,
};
use crate::pipeline::{
    CacheGenerationPipeline, DirectoryLocator, ImageCrateTransform, ImageTransform, PipelineError,
    RunSummary,
};
use crate::store::{SqliteStore, Store};

/// The transform used by [`GalleriaService::open`].
pub type DefaultTransform = ImageCrateTransform<DirectoryLocator>;

/// Sweeper settings taken from the `[jobs]` configuration section.
#[derive(Debug, Clone, Copy)]
struct SweepSettings {
    stale_after: Duration,
    interval: Duration,
    policy: StalePolicy,
    retention: Option<Duration>,
}

/// High-level facade over the cache engine.
///
/// Wires one store into every component and owns the registry of runs
/// active in this process, so cancel and pause requests reach a running
/// job directly and a job is never run twice concurrently by one process.
///
/// # Example
///
/// ```ignore
/// use galleria::config::ConfigFile;
/// use galleria::jobs::{JobRequest, JobScope, JobType};
/// use galleria::service::GalleriaService;
///
/// let service = GalleriaService::open(&ConfigFile::load()?)?;
/// let id = service.submit_job(JobRequest::new(JobType::Cache, scope))?;
/// let summary = service.run_job(&id).await?;
/// ```
pub struct GalleriaService<T> {
    store: Arc<dyn Store>,
    control: JobControl,
    pipeline: CacheGenerationPipeline<T>,
    admin: CacheFolderAdmin,
    janitor: ArtifactJanitor,
    sweep: SweepSettings,
}

impl GalleriaService<DefaultTransform> {
    /// Opens the configured SQLite database and sources directory.
    pub fn open(config: &ConfigFile) -> Result<Self, ServiceError> {
        let store = SqliteStore::open(&config.storage.database)?;
        let transform = ImageCrateTransform::new(DirectoryLocator::new(&config.sources.directory));
        info!(
            database = %config.storage.database.display(),
            sources = %config.sources.directory.display(),
            "Galleria service opened"
        );
        Ok(Self::new(Arc::new(store), Arc::new(transform), config))
    }
}

impl<T: ImageTransform> GalleriaService<T> {
    /// Builds the service on an existing store and transform.
    pub fn new(store: Arc<dyn Store>, transform: Arc<T>, config: &ConfigFile) -> Self {
        let folders = Arc::clone(&store).folder_store();
        let artifacts = Arc::clone(&store).artifact_store();
        let tracker = JobStateTracker::new(Arc::clone(&store).job_store());

        let pipeline = CacheGenerationPipeline::new(
            tracker.clone(),
            Arc::clone(&folders),
            Arc::clone(&artifacts),
            transform,
        )
        .with_config(config.pipeline_config());
        let janitor = ArtifactJanitor::new(
            Arc::clone(&artifacts),
            CacheSizeAccountant::new(Arc::clone(&folders)),
        );

        Self {
            control: JobControl::new(tracker, ActiveRuns::new()),
            admin: CacheFolderAdmin::new(folders, artifacts),
            pipeline,
            janitor,
            sweep: SweepSettings {
                stale_after: config.stale_after(),
                interval: config.sweep_interval(),
                policy: config.jobs.stale_policy,
                retention: config.retention(),
            },
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn jobs(&self) -> &JobControl {
        &self.control
    }

    pub fn folders(&self) -> &CacheFolderAdmin {
        &self.admin
    }

    pub fn janitor(&self) -> &ArtifactJanitor {
        &self.janitor
    }

    pub fn submit_job(&self, request: JobRequest) -> Result<JobId, ServiceError> {
        Ok(self.control.submit(request)?)
    }

    pub fn job_status(&self, id: &JobId) -> Result<JobStatusReport, ServiceError> {
        Ok(self.control.status(id)?)
    }

    /// Starts a job in the background.
    ///
    /// Fails if the job cannot move to Running or a run of it is already
    /// active in this process. The run registration is released when the
    /// background task ends, however it ends.
    pub fn start_job(&self, id: &JobId) -> Result<JobRunHandle, ServiceError> {
        self.control.check_runnable(id)?;
        let runs = self.control.active_runs().clone();
        let control = runs
            .register(*id)
            .ok_or(ServiceError::AlreadyRunning(*id))?;

        let pipeline = self.pipeline.clone();
        let job_id = *id;
        let run_control = control.clone();
        let handle = tokio::spawn(async move {
            let _registration = Registration { runs, job_id };
            pipeline.run(&job_id, run_control).await
        });

        Ok(JobRunHandle {
            job_id,
            control,
            handle,
        })
    }

    /// Runs a job to the end of this run and returns its summary.
    pub async fn run_job(&self, id: &JobId) -> Result<RunSummary, ServiceError> {
        self.start_job(id)?.wait().await
    }

    /// Resumes a Paused, Failed or Cancelled job from its recorded progress.
    pub fn resume_job(&self, id: &JobId) -> Result<JobRunHandle, ServiceError> {
        info!(job_id = %id, "Resuming job");
        self.start_job(id)
    }

    pub fn cancel_job(&self, id: &JobId) -> Result<ControlAck, ServiceError> {
        Ok(self.control.cancel(id)?)
    }

    pub fn pause_job(&self, id: &JobId) -> Result<ControlAck, ServiceError> {
        Ok(self.control.pause(id)?)
    }

    /// Recomputes folder size counters from their artifact records.
    ///
    /// A running job increments a folder before its artifact record exists,
    /// so reconciling during a run can drop that increment. Refused while any
    /// job is Running, in this process or another, unless `force` is set.
    pub fn reconcile_folders(
        &self,
        id: Option<&FolderId>,
        force: bool,
    ) -> Result<Vec<Reconciliation>, ServiceError> {
        if !force {
            let running = self.control.list(Some(JobStatus::Running))?.len();
            if running > 0 {
                return Err(ServiceError::JobsRunning(running));
            }
        }
        match id {
            Some(id) => Ok(vec![self.admin.reconcile(id)?]),
            None => Ok(self.admin.reconcile_all()?),
        }
    }

    /// Builds a sweeper from the configured job settings.
    pub fn sweeper(&self) -> StaleJobSweeper {
        StaleJobSweeper::new(self.control.tracker().clone())
            .with_stale_after(self.sweep.stale_after)
            .with_interval(self.sweep.interval)
            .with_policy(self.sweep.policy)
            .with_retention(self.sweep.retention)
            .with_active_runs(self.control.active_runs().clone())
            .with_janitor(self.janitor.clone())
    }

    /// Runs the sweeper in the background until `shutdown` is cancelled.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.sweeper().run(shutdown))
    }

    /// Pauses every run active in this process.
    ///
    /// Runs stop after their in-flight items and stay resumable.
    pub fn shutdown(&self) -> usize {
        let paused = self.control.active_runs().pause_all();
        if paused > 0 {
            info!(paused, "Pausing active job runs for shutdown");
        }
        paused
    }
}

/// Removes a run from the registry when its task ends.
struct Registration {
    runs: ActiveRuns,
    job_id: JobId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.runs.remove(&self.job_id);
    }
}

/// Handle to a job running in the background.
pub struct JobRunHandle {
    job_id: JobId,
    control: RunControl,
    handle: JoinHandle<Result<RunSummary, PipelineError>>,
}

impl JobRunHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Asks the run to stop and mark the job Cancelled.
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    /// Asks the run to stop and leave the job Paused.
    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    /// Waits for the run to end.
    pub async fn wait(self) -> Result<RunSummary, ServiceError> {
        match self.handle.await {
            Ok(result) => Ok(result?),
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "Job run task aborted");
                Err(PipelineError::Worker(e.to_string()).into())
            }
        }
    }
}
