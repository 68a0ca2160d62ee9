//! Integration tests for the resumable job lifecycle.
//!
//! These tests verify the complete job workflow including:
//! - Per-item outcomes recorded exactly once
//! - Jobs completing with failed items
//! - Resuming a paused job without redoing finished items
//! - Cancellation preserving recorded progress
//! - Stale job sweeping
//! - End-to-end generation through SQLite and the `image` crate

mod common;

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use galleria::artifacts::{artifact_path, ArtifactStore};
use galleria::config::ConfigFile;
use galleria::ids::ImageId;
use galleria::jobs::{
    ControlAck, JobScope, JobStatus, JobType, OutputProfile, ProcessingJob, StalePolicy,
};
use galleria::service::GalleriaService;
use galleria::store::{MemoryStore, Store};
use tempfile::TempDir;

use common::{add_folder, cache_request, memory_service, FixedTransform};

// =============================================================================
// Item Marks
// =============================================================================

#[tokio::test]
async fn test_double_mark_counts_once() {
    let transform = Arc::new(FixedTransform::new(8));
    let (_store, service) = memory_service(&transform, 1);
    let id = service.submit_job(cache_request(&["a", "b"])).unwrap();
    let tracker = service.jobs().tracker();
    tracker.update_status(&id, JobStatus::Running, None).unwrap();

    let image = ImageId::from("a");
    assert!(tracker.mark_processed(&id, &image, 100).unwrap());
    assert!(!tracker.mark_processed(&id, &image, 100).unwrap());
    assert!(!tracker.mark_failed(&id, &image, "late failure").unwrap());

    let job = tracker.get(&id).unwrap();
    assert_eq!(job.progress.completed, 1);
    assert_eq!(job.progress.failed, 0);
    assert_eq!(job.progress.total_size_bytes, 100);
}

// =============================================================================
// Completion and Resume
// =============================================================================

#[tokio::test]
async fn test_failed_item_still_completes_job() {
    let dir = TempDir::new().unwrap();
    let transform = Arc::new(FixedTransform::new(8).failing("b"));
    let (_store, service) = memory_service(&transform, 2);
    add_folder(&service, dir.path(), "primary", 1, None);

    let id = service.submit_job(cache_request(&["a", "b", "c"])).unwrap();
    service.run_job(&id).await.unwrap();

    let report = service.job_status(&id).unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.progress.completed, 2);
    assert_eq!(report.progress.failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].image_id, ImageId::from("b"));
    assert!(!report.can_resume);
}

#[tokio::test]
async fn test_resume_processes_only_remaining_items() {
    let dir = TempDir::new().unwrap();
    let transform = Arc::new(FixedTransform::new(8));
    let (_store, service) = memory_service(&transform, 1);
    add_folder(&service, dir.path(), "primary", 1, None);

    // A and B were recorded by a run that was then paused.
    let id = service.submit_job(cache_request(&["a", "b", "c"])).unwrap();
    let tracker = service.jobs().tracker();
    tracker.update_status(&id, JobStatus::Running, None).unwrap();
    tracker.mark_processed(&id, &ImageId::from("a"), 8).unwrap();
    tracker.mark_processed(&id, &ImageId::from("b"), 8).unwrap();
    tracker.update_status(&id, JobStatus::Paused, None).unwrap();

    let summary = service.resume_job(&id).unwrap().wait().await.unwrap();

    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.processed, 1);
    assert_eq!(transform.calls(), vec![ImageId::from("c")]);
    assert_eq!(service.job_status(&id).unwrap().progress.completed, 3);
}

#[tokio::test]
async fn test_cancel_preserves_progress() {
    let dir = TempDir::new().unwrap();
    let transform = Arc::new(FixedTransform::new(8));
    let (_store, service) = memory_service(&transform, 1);
    add_folder(&service, dir.path(), "primary", 1, None);

    let id = service.submit_job(cache_request(&["a", "b", "c"])).unwrap();
    let tracker = service.jobs().tracker();
    tracker.update_status(&id, JobStatus::Running, None).unwrap();
    tracker.mark_processed(&id, &ImageId::from("a"), 8).unwrap();

    // No run is active in this process, so the status is written directly.
    assert_eq!(
        service.cancel_job(&id).unwrap(),
        ControlAck::Applied(JobStatus::Cancelled)
    );

    let report = service.job_status(&id).unwrap();
    assert_eq!(report.status, JobStatus::Cancelled);
    assert_eq!(report.progress.completed, 1);
    assert!(report.completed_at.is_some());

    // Nothing more is recorded once cancelled.
    assert!(!tracker.mark_processed(&id, &ImageId::from("b"), 8).unwrap());
}

// =============================================================================
// Sweeping
// =============================================================================

#[tokio::test]
async fn test_sweep_flips_stale_running_job() {
    let transform = Arc::new(FixedTransform::new(8));
    let (_store, service) = memory_service(&transform, 1);
    let id = service.submit_job(cache_request(&["a", "b"])).unwrap();
    let tracker = service.jobs().tracker();
    tracker.update_status(&id, JobStatus::Running, None).unwrap();
    tracker.mark_processed(&id, &ImageId::from("a"), 8).unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let sweeper = service
        .sweeper()
        .with_stale_after(Duration::ZERO)
        .with_policy(StalePolicy::Pause);
    let report = sweeper.sweep_once().await.unwrap();
    assert_eq!(report.flipped, 1);

    let job = tracker.get(&id).unwrap();
    assert_eq!(job.status, JobStatus::Paused);
    assert_eq!(job.progress.completed, 1);

    // A second sweep finds nothing to do.
    assert_eq!(sweeper.sweep_once().await.unwrap().flipped, 0);
}

#[tokio::test]
async fn test_sweep_purges_old_terminal_jobs() {
    let store = Arc::new(MemoryStore::new());
    let tracker = galleria::jobs::JobStateTracker::new(store.clone());
    let job = ProcessingJob::new(
        JobType::Thumbnail,
        JobScope::images([ImageId::from("a")]),
        OutputProfile::thumbnail_default(),
    );
    tracker.create(&job).unwrap();
    tracker
        .update_status(&job.id, JobStatus::Cancelled, None)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(tracker.purge_terminal_jobs(Duration::ZERO).unwrap(), 1);
    assert!(tracker.get(&job.id).is_err());
}

// =============================================================================
// End to End
// =============================================================================

fn write_png(path: &std::path::Path, width: u32, height: u32) {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
        .unwrap();
    std::fs::write(path, buffer).unwrap();
}

#[tokio::test]
async fn test_sqlite_service_generates_artifacts() {
    let dir = TempDir::new().unwrap();
    let sources = dir.path().join("originals");
    std::fs::create_dir_all(&sources).unwrap();
    write_png(&sources.join("sunset.png"), 400, 200);
    write_png(&sources.join("harbor.png"), 100, 100);

    let mut config = ConfigFile::default();
    config.storage.database = dir.path().join("galleria.db");
    config.sources.directory = sources;
    let service = GalleriaService::open(&config).unwrap();
    let cache_root = dir.path().join("cache");
    let folder = service
        .folders()
        .create(galleria::folders::NewCacheFolder::new("cache", &cache_root, 1))
        .unwrap();

    let profile = OutputProfile::thumbnail_default();
    let id = service
        .submit_job(
            galleria::jobs::JobRequest::new(
                JobType::Thumbnail,
                JobScope::images(["sunset", "harbor", "missing"].map(ImageId::from)),
            )
            .with_profile(profile.clone()),
        )
        .unwrap();
    let summary = service.run_job(&id).await.unwrap();

    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 1);

    let sunset = ImageId::from("sunset");
    let path = artifact_path(&cache_root, &sunset, &profile);
    let thumbnail = image::open(&path).unwrap();
    assert_eq!((thumbnail.width(), thumbnail.height()), (320, 160));

    let artifacts = Arc::clone(service.store()).artifact_store();
    let records = artifacts.artifacts_for_image(&sunset).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].folder_id, folder.id);

    let stats = service.folders().stats().unwrap();
    assert_eq!(stats.total_files, 2);
    assert_eq!(stats.total_size_bytes, summary.bytes_written);
}
