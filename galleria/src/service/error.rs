//! Service error types.

use std::fmt;

use crate::config::ConfigFileError;
use crate::folders::AdminError;
use crate::ids::JobId;
use crate::jobs::JobError;
use crate::pipeline::PipelineError;
use crate::store::StoreError;

/// Errors that can occur during service operations.
#[derive(Debug)]
pub enum ServiceError {
    /// Store could not be opened or used
    Store(StoreError),
    /// Job state or control failure
    Job(JobError),
    /// A job run ended with an error
    Pipeline(PipelineError),
    /// Cache folder administration failure
    Admin(AdminError),
    /// Invalid or unreadable configuration
    Config(ConfigFileError),
    /// A run of the job is already active in this process
    AlreadyRunning(JobId),
    /// The operation needs every job to be stopped
    JobsRunning(usize),
}

impl ServiceError {
    /// Returns true when the failure was a storage outage.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_unavailable(),
            Self::Job(e) => e.is_unavailable(),
            Self::Pipeline(e) => e.is_unavailable(),
            Self::Admin(AdminError::Store(e)) => e.is_unavailable(),
            _ => false,
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "Store error: {}", e),
            Self::Job(e) => write!(f, "Job error: {}", e),
            Self::Pipeline(e) => write!(f, "Job run failed: {}", e),
            Self::Admin(e) => write!(f, "Cache folder error: {}", e),
            Self::Config(e) => write!(f, "Configuration error: {}", e),
            Self::AlreadyRunning(id) => write!(f, "Job {} is already running", id),
            Self::JobsRunning(count) => write!(f, "{} job(s) still running", count),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Job(e) => Some(e),
            Self::Pipeline(e) => Some(e),
            Self::Admin(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::AlreadyRunning(_) | Self::JobsRunning(_) => None,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<JobError> for ServiceError {
    fn from(e: JobError) -> Self {
        Self::Job(e)
    }
}

impl From<PipelineError> for ServiceError {
    fn from(e: PipelineError) -> Self {
        Self::Pipeline(e)
    }
}

impl From<AdminError> for ServiceError {
    fn from(e: AdminError) -> Self {
        Self::Admin(e)
    }
}

impl From<ConfigFileError> for ServiceError {
    fn from(e: ConfigFileError) -> Self {
        Self::Config(e)
    }
}
