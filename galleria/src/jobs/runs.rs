//! Stop signals for job runs in this process.
//!
//! A run is driven by a [`RunControl`]; the registry of [`ActiveRuns`] lets
//! the control API and the stale sweeper find the run of a job without any
//! process-wide "current job".

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::ids::JobId;

/// Why a run was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// End the run as Cancelled.
    Cancel,
    /// End the run as Paused.
    Pause,
}

const NOT_STOPPED: u8 = 0;
const STOP_CANCEL: u8 = 1;
const STOP_PAUSE: u8 = 2;

/// Cooperative stop signal for one run.
///
/// Workers check it between items; items already in flight finish. The
/// first signal wins, so a pause that races a cancel cannot downgrade it.
#[derive(Debug, Clone)]
pub struct RunControl {
    token: CancellationToken,
    reason: Arc<AtomicU8>,
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(AtomicU8::new(NOT_STOPPED)),
        }
    }

    /// Asks the run to stop and end Cancelled.
    pub fn cancel(&self) -> bool {
        self.signal(STOP_CANCEL)
    }

    /// Asks the run to stop and end Paused.
    pub fn pause(&self) -> bool {
        self.signal(STOP_PAUSE)
    }

    fn signal(&self, reason: u8) -> bool {
        let first = self
            .reason
            .compare_exchange(NOT_STOPPED, reason, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        self.token.cancel();
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.reason.load(Ordering::SeqCst) {
            STOP_CANCEL => Some(StopReason::Cancel),
            STOP_PAUSE => Some(StopReason::Pause),
            _ => None,
        }
    }

    /// The underlying token, for `select!` loops.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of runs currently executing in this process.
#[derive(Debug, Clone, Default)]
pub struct ActiveRuns {
    runs: Arc<DashMap<JobId, RunControl>>,
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a run for the job. Returns `None` if one is already active.
    pub fn register(&self, id: JobId) -> Option<RunControl> {
        match self.runs.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let control = RunControl::new();
                slot.insert(control.clone());
                Some(control)
            }
        }
    }

    pub fn get(&self, id: &JobId) -> Option<RunControl> {
        self.runs.get(id).map(|r| r.value().clone())
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.runs.contains_key(id)
    }

    pub fn remove(&self, id: &JobId) {
        self.runs.remove(id);
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Asks every active run to pause. Used on shutdown.
    pub fn pause_all(&self) -> usize {
        self.runs.iter().filter(|r| r.value().pause()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_signal_wins() {
        let control = RunControl::new();
        assert!(control.cancel());
        assert!(!control.pause());
        assert_eq!(control.stop_reason(), Some(StopReason::Cancel));
        assert!(control.is_stopped());
    }

    #[test]
    fn test_clones_share_state() {
        let control = RunControl::new();
        let worker_view = control.clone();
        control.pause();
        assert_eq!(worker_view.stop_reason(), Some(StopReason::Pause));
        assert!(worker_view.token().is_cancelled());
    }

    #[test]
    fn test_register_once_per_job() {
        let runs = ActiveRuns::new();
        let id = JobId::new();

        assert!(runs.register(id).is_some());
        assert!(runs.register(id).is_none());
        assert!(runs.contains(&id));

        runs.remove(&id);
        assert!(runs.register(id).is_some());
    }

    #[test]
    fn test_pause_all() {
        let runs = ActiveRuns::new();
        let a = runs.register(JobId::new()).unwrap();
        let b = runs.register(JobId::new()).unwrap();
        b.cancel();

        assert_eq!(runs.pause_all(), 1);
        assert_eq!(a.stop_reason(), Some(StopReason::Pause));
        assert_eq!(b.stop_reason(), Some(StopReason::Cancel));
    }
}
