//! Resumable processing jobs.
//!
//! A job walks a scope of images and records one outcome per image. Outcomes
//! are recorded through an add-if-absent primitive, so a job that is paused,
//! cancelled or abandoned by a crashed process can be resumed and will only
//! process the images that have no outcome yet.
//!
//! - [`JobStateStore`]: persistence contract with atomic per-item marks
//! - [`JobStateTracker`]: the only writer of job records
//! - [`JobControl`]: submit, inspect, cancel and pause jobs
//! - [`ActiveRuns`]: stop signals for runs executing in this process
//! - [`StaleJobSweeper`]: flips jobs abandoned by a dead process

mod control;
mod runs;
mod store;
mod sweeper;
mod tracker;
mod types;

pub use control::{ControlAck, ItemError, JobControl, JobRequest, JobStatusReport};
pub use runs::{ActiveRuns, RunControl, StopReason};
pub use store::JobStateStore;
pub use sweeper::{
    StaleJobSweeper, StalePolicy, SweepReport, DEFAULT_STALE_AFTER_SECS,
    DEFAULT_SWEEP_INTERVAL_SECS,
};
pub use tracker::{JobError, JobStateTracker};
pub use types::{
    ItemOutcome, JobProgress, JobScope, JobStatus, JobType, OutputFormat, OutputProfile,
    ProcessingJob, StatusChange, TransitionOutcome,
};
