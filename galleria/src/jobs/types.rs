//! Processing job records and their state machine.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CollectionId, ImageId, JobId};

// ─────────────────────────────────────────────────────────────────────────────
// Job descriptors
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of derivative a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Full-size display cache.
    Cache,
    /// Small preview images.
    Thumbnail,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Thumbnail => "thumbnail",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cache" => Ok(Self::Cache),
            "thumbnail" => Ok(Self::Thumbnail),
            other => Err(format!("unknown job type '{}'", other)),
        }
    }
}

/// The set of images a job works through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobScope {
    /// Every image of one collection, resolved by the caller at submit time.
    Collection {
        collection_id: CollectionId,
        image_ids: Vec<ImageId>,
    },
    /// An explicit list of images.
    Images { image_ids: Vec<ImageId> },
}

impl JobScope {
    /// Creates an image-list scope, dropping duplicate ids but keeping order.
    pub fn images(ids: impl IntoIterator<Item = ImageId>) -> Self {
        Self::Images {
            image_ids: dedupe(ids),
        }
    }

    /// Creates a collection scope, dropping duplicate ids but keeping order.
    pub fn collection(
        collection_id: impl Into<CollectionId>,
        ids: impl IntoIterator<Item = ImageId>,
    ) -> Self {
        Self::Collection {
            collection_id: collection_id.into(),
            image_ids: dedupe(ids),
        }
    }

    pub fn image_ids(&self) -> &[ImageId] {
        match self {
            Self::Collection { image_ids, .. } | Self::Images { image_ids } => image_ids,
        }
    }

    pub fn contains(&self, image_id: &ImageId) -> bool {
        self.image_ids().contains(image_id)
    }

    pub fn collection_id(&self) -> Option<&CollectionId> {
        match self {
            Self::Collection { collection_id, .. } => Some(collection_id),
            Self::Images { .. } => None,
        }
    }

    pub fn len(&self) -> usize {
        self.image_ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_ids().is_empty()
    }
}

fn dedupe(ids: impl IntoIterator<Item = ImageId>) -> Vec<ImageId> {
    let mut seen = BTreeSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Encoded format of a generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::WebP => "webp",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::WebP => "webp",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "webp" => Ok(Self::WebP),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

/// Output profile for generated artifacts.
///
/// Two artifacts of the same image with equal profiles share a path, so
/// regenerating overwrites in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputProfile {
    pub format: OutputFormat,
    /// Encoder quality, 1-100. Ignored by lossless formats.
    pub quality: u8,
    pub max_width: u32,
    pub max_height: u32,
}

impl OutputProfile {
    pub fn new(format: OutputFormat, quality: u8, max_width: u32, max_height: u32) -> Self {
        Self {
            format,
            quality: quality.clamp(1, 100),
            max_width,
            max_height,
        }
    }

    /// Default display-cache profile.
    pub fn cache_default() -> Self {
        Self::new(OutputFormat::Jpeg, 85, 2048, 2048)
    }

    /// Default thumbnail profile.
    pub fn thumbnail_default() -> Self {
        Self::new(OutputFormat::Jpeg, 80, 320, 320)
    }

    /// Deterministic key naming this profile, e.g. `jpeg_q85_2048x2048`.
    pub fn key(&self) -> String {
        format!(
            "{}_q{}_{}x{}",
            self.format, self.quality, self.max_width, self.max_height
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status and state machine
// ─────────────────────────────────────────────────────────────────────────────

/// Job lifecycle status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted, not yet started.
    #[default]
    Pending,
    Running,
    /// Stopped between items; resumable.
    Paused,
    /// Scope fully consumed. Terminal and immutable.
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        Self::Pending,
        Self::Running,
        Self::Paused,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true for Completed, Failed and Cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true for Pending, Running and Paused.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Statuses a job may move to `self` from.
    ///
    /// Leaving Failed, Cancelled or Paused for Running additionally requires
    /// `can_resume`; see [`ProcessingJob::accepts_transition`].
    pub fn allowed_predecessors(&self) -> &'static [JobStatus] {
        match self {
            Self::Pending => &[],
            Self::Running => &[Self::Pending, Self::Paused, Self::Failed, Self::Cancelled],
            Self::Paused => &[Self::Running],
            Self::Completed => &[Self::Running],
            Self::Failed => &[Self::Pending, Self::Running, Self::Paused],
            Self::Cancelled => &[Self::Pending, Self::Running, Self::Paused],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.allowed_predecessors().contains(self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|status| status.as_str() == s.trim().to_lowercase())
            .copied()
            .ok_or_else(|| format!("unknown job status '{}'", s))
    }
}

/// A requested status change, applied atomically by the job store.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub to: JobStatus,
    pub error_message: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub fn new(to: JobStatus) -> Self {
        Self {
            to,
            error_message: None,
            at: Utc::now(),
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }
}

/// Result of a conditional status change.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The change was applied; carries the updated job.
    Applied(ProcessingJob),
    /// The job's current status did not permit the change.
    Rejected { current: JobStatus },
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-item outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// The outcome recorded for one item of a job's scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Processed { size_bytes: u64 },
    Failed { reason: String },
    Skipped,
}

impl ItemOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Processed { .. } => "processed",
            Self::Failed { .. } => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Progress counters of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub total_size_bytes: u64,
}

impl JobProgress {
    /// Items with a recorded outcome.
    pub fn handled(&self) -> u64 {
        self.completed + self.failed + self.skipped
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.handled())
    }

    pub fn is_scope_consumed(&self) -> bool {
        self.handled() >= self.total
    }

    /// Percentage of scope handled, 100 for an empty scope.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.handled() as f64 * 100.0 / self.total as f64
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// The job record
// ─────────────────────────────────────────────────────────────────────────────

/// Persisted state of a processing job.
///
/// While a job is active its record only changes through the store's
/// conditional operations (`record_item`, `transition_job`,
/// `fail_stale_job`). An image id is never in both `processed_image_ids` and
/// `failed_image_ids`. Skipped items live in `processed_image_ids`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingJob {
    pub id: JobId,
    pub job_type: JobType,
    pub scope: JobScope,
    pub profile: OutputProfile,
    pub skip_existing: bool,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub processed_image_ids: BTreeSet<ImageId>,
    pub failed_image_ids: BTreeSet<ImageId>,
    /// Failure reason per failed image.
    pub item_errors: BTreeMap<ImageId, String>,
    /// Heartbeat, refreshed by every recorded item and by starting a run.
    pub last_progress_at: Option<DateTime<Utc>>,
    pub can_resume: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl ProcessingJob {
    /// Creates a Pending job.
    pub fn new(job_type: JobType, scope: JobScope, profile: OutputProfile) -> Self {
        let now = Utc::now();
        let total = scope.len() as u64;
        Self {
            id: JobId::new(),
            job_type,
            scope,
            profile,
            skip_existing: false,
            status: JobStatus::Pending,
            progress: JobProgress {
                total,
                ..Default::default()
            },
            processed_image_ids: BTreeSet::new(),
            failed_image_ids: BTreeSet::new(),
            item_errors: BTreeMap::new(),
            last_progress_at: None,
            can_resume: true,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            error_message: None,
        }
    }

    pub fn with_skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }

    /// Returns true if the item already has a recorded outcome.
    pub fn is_handled(&self, image_id: &ImageId) -> bool {
        self.processed_image_ids.contains(image_id) || self.failed_image_ids.contains(image_id)
    }

    /// Scope items without a recorded outcome, in scope order.
    pub fn pending_items(&self) -> Vec<ImageId> {
        self.scope
            .image_ids()
            .iter()
            .filter(|id| !self.is_handled(id))
            .cloned()
            .collect()
    }

    /// Whether per-item outcomes may still be recorded.
    pub fn accepts_items(&self) -> bool {
        self.status.is_active()
    }

    /// Whether the status change is legal from the current state.
    pub fn accepts_transition(&self, from: &[JobStatus], to: JobStatus) -> bool {
        if !from.contains(&self.status) || !self.status.can_transition_to(to) {
            return false;
        }
        // Leaving anything but Pending for Running is a resume.
        if to == JobStatus::Running && self.status != JobStatus::Pending {
            return self.can_resume;
        }
        true
    }

    /// Records an item outcome if the item belongs to the scope and has none
    /// yet.
    ///
    /// This is the in-memory form of the store's add-if-absent primitive; the
    /// caller must hold exclusive access to the record for the duration.
    pub fn record_item(
        &mut self,
        image_id: &ImageId,
        outcome: &ItemOutcome,
        at: DateTime<Utc>,
    ) -> bool {
        if !self.accepts_items() || !self.scope.contains(image_id) || self.is_handled(image_id) {
            return false;
        }

        match outcome {
            ItemOutcome::Processed { size_bytes } => {
                self.processed_image_ids.insert(image_id.clone());
                self.progress.completed += 1;
                self.progress.total_size_bytes += size_bytes;
            }
            ItemOutcome::Failed { reason } => {
                self.failed_image_ids.insert(image_id.clone());
                self.item_errors.insert(image_id.clone(), reason.clone());
                self.progress.failed += 1;
            }
            ItemOutcome::Skipped => {
                self.processed_image_ids.insert(image_id.clone());
                self.progress.skipped += 1;
            }
        }

        self.last_progress_at = Some(at);
        self.updated_at = at;
        true
    }

    /// Applies an already-validated status change.
    pub fn apply_status(&mut self, change: &StatusChange) {
        match change.to {
            JobStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(change.at);
                }
                self.last_progress_at = Some(change.at);
                self.completed_at = None;
                self.error_message = None;
            }
            JobStatus::Completed => {
                self.completed_at = Some(change.at);
                self.can_resume = false;
            }
            JobStatus::Failed | JobStatus::Cancelled => {
                self.completed_at = Some(change.at);
            }
            JobStatus::Pending | JobStatus::Paused => {}
        }

        if change.error_message.is_some() {
            self.error_message = change.error_message.clone();
        }
        self.status = change.to;
        self.updated_at = change.at;
    }

    /// Returns true if the job is Running without a heartbeat since `cutoff`.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == JobStatus::Running
            && self
                .last_progress_at
                .or(self.started_at)
                .unwrap_or(self.created_at)
                < cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(ids: &[&str]) -> ProcessingJob {
        ProcessingJob::new(
            JobType::Cache,
            JobScope::images(ids.iter().map(|s| ImageId::from(*s))),
            OutputProfile::cache_default(),
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Descriptor tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_scope_dedupes_preserving_order() {
        let scope = JobScope::images(["b", "a", "b", "c", "a"].map(ImageId::from));
        let ids: Vec<_> = scope.image_ids().iter().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_collection_scope_exposes_collection() {
        let scope = JobScope::collection("holiday", [ImageId::from("x")]);
        assert_eq!(scope.collection_id().map(|c| c.as_str()), Some("holiday"));
        assert_eq!(scope.len(), 1);
    }

    #[test]
    fn test_profile_key_is_deterministic() {
        let profile = OutputProfile::new(OutputFormat::WebP, 70, 800, 600);
        assert_eq!(profile.key(), "webp_q70_800x600");
        assert_eq!(profile.key(), profile.clone().key());
    }

    #[test]
    fn test_profile_quality_is_clamped() {
        assert_eq!(OutputProfile::new(OutputFormat::Jpeg, 0, 1, 1).quality, 1);
        assert_eq!(OutputProfile::new(OutputFormat::Jpeg, 250, 1, 1).quality, 100);
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("Thumbnail".parse::<JobType>().unwrap(), JobType::Thumbnail);
        assert_eq!("jpg".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("PAUSED".parse::<JobStatus>().unwrap(), JobStatus::Paused);
        assert!("bogus".parse::<JobStatus>().is_err());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State machine tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_state_machine_edges() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Paused.can_transition_to(Completed));
    }

    #[test]
    fn test_resume_requires_can_resume() {
        let mut j = job(&["a"]);
        j.status = JobStatus::Cancelled;
        assert!(j.accepts_transition(&[JobStatus::Cancelled], JobStatus::Running));

        j.can_resume = false;
        assert!(!j.accepts_transition(&[JobStatus::Cancelled], JobStatus::Running));
    }

    #[test]
    fn test_transition_requires_expected_source() {
        let j = job(&["a"]);
        assert!(!j.accepts_transition(&[JobStatus::Paused], JobStatus::Running));
        assert!(j.accepts_transition(&[JobStatus::Pending], JobStatus::Running));
    }

    #[test]
    fn test_completed_forces_can_resume_false() {
        let mut j = job(&["a"]);
        j.apply_status(&StatusChange::new(JobStatus::Running));
        j.apply_status(&StatusChange::new(JobStatus::Completed));

        assert_eq!(j.status, JobStatus::Completed);
        assert!(!j.can_resume);
        assert!(j.completed_at.is_some());
    }

    #[test]
    fn test_running_keeps_first_start_time() {
        let mut j = job(&["a"]);
        let first = Utc::now() - Duration::minutes(5);
        j.apply_status(&StatusChange::new(JobStatus::Running).at(first));
        j.apply_status(&StatusChange::new(JobStatus::Paused));
        j.apply_status(&StatusChange::new(JobStatus::Running));

        assert_eq!(j.started_at, Some(first));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Item recording tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_record_item_is_idempotent() {
        let mut j = job(&["a", "b"]);
        let a = ImageId::from("a");
        let now = Utc::now();

        assert!(j.record_item(&a, &ItemOutcome::Processed { size_bytes: 10 }, now));
        assert!(!j.record_item(&a, &ItemOutcome::Processed { size_bytes: 10 }, now));
        assert!(!j.record_item(&a, &ItemOutcome::Failed { reason: "x".into() }, now));

        assert_eq!(j.progress.completed, 1);
        assert_eq!(j.progress.failed, 0);
        assert_eq!(j.progress.total_size_bytes, 10);
        assert!(!j.failed_image_ids.contains(&a));
    }

    #[test]
    fn test_skipped_items_count_as_processed_ids() {
        let mut j = job(&["a"]);
        let a = ImageId::from("a");
        assert!(j.record_item(&a, &ItemOutcome::Skipped, Utc::now()));

        assert!(j.processed_image_ids.contains(&a));
        assert_eq!(j.progress.skipped, 1);
        assert_eq!(j.progress.completed, 0);
        assert!(j.progress.is_scope_consumed());
    }

    #[test]
    fn test_terminal_job_rejects_items() {
        for status in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            let mut j = job(&["a"]);
            j.status = status;
            assert!(!j.record_item(&ImageId::from("a"), &ItemOutcome::Skipped, Utc::now()));
            assert_eq!(j.progress.handled(), 0);
        }
    }

    #[test]
    fn test_paused_job_accepts_items() {
        let mut j = job(&["a"]);
        j.status = JobStatus::Paused;
        assert!(j.record_item(&ImageId::from("a"), &ItemOutcome::Skipped, Utc::now()));
    }

    #[test]
    fn test_items_outside_scope_are_refused() {
        let mut j = job(&["a"]);
        let now = Utc::now();

        let processed = ItemOutcome::Processed { size_bytes: 5 };
        let failed = ItemOutcome::Failed { reason: "x".into() };
        assert!(!j.record_item(&ImageId::from("stranger"), &processed, now));
        assert!(!j.record_item(&ImageId::from("other"), &failed, now));

        assert_eq!(j.progress.handled(), 0);
        assert!(!j.progress.is_scope_consumed());
        assert!(j.item_errors.is_empty());
        assert_eq!(j.pending_items(), vec![ImageId::from("a")]);
    }

    #[test]
    fn test_pending_items_excludes_handled() {
        let mut j = job(&["a", "b", "c"]);
        let now = Utc::now();
        j.record_item(&ImageId::from("a"), &ItemOutcome::Skipped, now);
        j.record_item(&ImageId::from("b"), &ItemOutcome::Failed { reason: "bad".into() }, now);

        assert_eq!(j.pending_items(), vec![ImageId::from("c")]);
    }

    #[test]
    fn test_is_stale_only_when_running() {
        let mut j = job(&["a"]);
        let old = Utc::now() - Duration::hours(1);
        j.apply_status(&StatusChange::new(JobStatus::Running).at(old));

        assert!(j.is_stale(Utc::now() - Duration::minutes(5)));
        assert!(!j.is_stale(old - Duration::minutes(5)));

        j.apply_status(&StatusChange::new(JobStatus::Paused));
        assert!(!j.is_stale(Utc::now()));
    }

    #[test]
    fn test_progress_percent() {
        let progress = JobProgress {
            total: 4,
            completed: 1,
            failed: 1,
            ..Default::default()
        };
        assert!((progress.percent() - 50.0).abs() < f64::EPSILON);
        assert_eq!(progress.remaining(), 2);
        assert_eq!(JobProgress::default().percent(), 100.0);
    }
}
