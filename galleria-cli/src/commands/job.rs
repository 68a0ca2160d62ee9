//! Job CLI commands.
//!
//! Jobs run in the foreground of `job run` / `job resume`. Ctrl-C pauses the
//! run after its in-flight items, so it can be resumed later. `job cancel`
//! and `job pause` from another shell take effect the next time the running
//! process records an item.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use galleria::config::format_size;
use galleria::ids::{ImageId, JobId};
use galleria::jobs::{
    ControlAck, JobRequest, JobScope, JobStatus, JobStatusReport, JobType, OutputFormat,
    OutputProfile,
};
use galleria::pipeline::RunSummary;
use galleria::service::{DefaultTransform, GalleriaService, JobRunHandle};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Job subcommands.
#[derive(Debug, Subcommand)]
pub enum JobCommands {
    /// Create a job over a set of images
    Submit {
        /// Job type: cache or thumbnail
        #[arg(long = "type", default_value = "cache")]
        job_type: JobType,

        /// Collection the images belong to
        #[arg(long)]
        collection: Option<String>,

        /// File with one image id per line
        #[arg(long)]
        from_file: Option<PathBuf>,

        /// Output format: jpeg, png or webp (job type default if omitted)
        #[arg(long)]
        format: Option<OutputFormat>,

        /// Encoder quality (1-100)
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
        quality: Option<u8>,

        /// Bounding box as WIDTHxHEIGHT, e.g. 1024x1024
        #[arg(long)]
        bounds: Option<String>,

        /// Skip images whose artifact already exists
        #[arg(long)]
        skip_existing: bool,

        /// Run the job right after submitting it
        #[arg(long)]
        run: bool,

        /// Image ids
        images: Vec<String>,
    },

    /// Show a job's status and progress
    Status {
        id: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List jobs, newest first
    List {
        /// Only show jobs with this status
        #[arg(long)]
        status: Option<JobStatus>,
    },

    /// Cancel a job, keeping its recorded progress
    Cancel { id: String },

    /// Pause a job so it can be resumed later
    Pause { id: String },

    /// Resume a paused, failed or cancelled job from where it stopped
    Resume { id: String },

    /// Run a pending job
    Run { id: String },
}

/// Run a job subcommand.
pub async fn run(command: JobCommands, runner: &CliRunner) -> Result<(), CliError> {
    runner.log_startup("job");
    let service = runner.create_service()?;

    match command {
        JobCommands::Submit {
            job_type,
            collection,
            from_file,
            format,
            quality,
            bounds,
            skip_existing,
            run,
            images,
        } => {
            let ids = collect_image_ids(images, from_file.as_deref())?;
            let scope = match collection {
                Some(collection) => JobScope::collection(collection, ids),
                None => JobScope::images(ids),
            };

            let mut request = JobRequest::new(job_type, scope).with_skip_existing(skip_existing);
            if format.is_some() || quality.is_some() || bounds.is_some() {
                request = request.with_profile(build_profile(job_type, format, quality, bounds)?);
            }

            let id = service.submit_job(request)?;
            println!("Submitted {} job {}", job_type, id);
            if run {
                let handle = service.start_job(&id)?;
                print_summary(&wait_interruptible(&service, handle).await?);
            }
        }
        JobCommands::Status { id, json } => {
            let report = service.job_status(&parse_id(&id)?)?;
            if json {
                let text = serde_json::to_string_pretty(&report)
                    .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
                println!("{}", text);
            } else {
                print_report(&report);
            }
        }
        JobCommands::List { status } => {
            let reports = service.jobs().list(status)?;
            if reports.is_empty() {
                println!("No jobs.");
            }
            for report in &reports {
                println!(
                    "{}  {:<9}  {:<9}  {}/{} handled, {} failed",
                    report.id,
                    report.job_type,
                    report.status,
                    report.progress.handled(),
                    report.progress.total,
                    report.progress.failed
                );
            }
        }
        JobCommands::Cancel { id } => {
            print_ack("Cancel", service.cancel_job(&parse_id(&id)?)?);
        }
        JobCommands::Pause { id } => {
            print_ack("Pause", service.pause_job(&parse_id(&id)?)?);
        }
        JobCommands::Resume { id } => {
            let handle = service.resume_job(&parse_id(&id)?)?;
            print_summary(&wait_interruptible(&service, handle).await?);
        }
        JobCommands::Run { id } => {
            let handle = service.start_job(&parse_id(&id)?)?;
            print_summary(&wait_interruptible(&service, handle).await?);
        }
    }

    Ok(())
}

/// Waits for a run, pausing it on Ctrl-C.
async fn wait_interruptible(
    service: &GalleriaService<DefaultTransform>,
    handle: JobRunHandle,
) -> Result<RunSummary, CliError> {
    let job_id = handle.job_id();
    println!("Running job {} (Ctrl-C pauses)", job_id);

    let wait = handle.wait();
    tokio::pin!(wait);

    let summary = tokio::select! {
        result = &mut wait => result?,
        _ = tokio::signal::ctrl_c() => {
            println!("Pausing after in-flight items...");
            service.pause_job(&job_id)?;
            wait.await?
        }
    };
    Ok(summary)
}

fn collect_image_ids(
    mut images: Vec<String>,
    from_file: Option<&Path>,
) -> Result<Vec<ImageId>, CliError> {
    if let Some(path) = from_file {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::InvalidArgument(format!("cannot read {}: {}", path.display(), e))
        })?;
        images.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    Ok(images.into_iter().map(ImageId::from).collect())
}

fn build_profile(
    job_type: JobType,
    format: Option<OutputFormat>,
    quality: Option<u8>,
    bounds: Option<String>,
) -> Result<OutputProfile, CliError> {
    let base = match job_type {
        JobType::Cache => OutputProfile::cache_default(),
        JobType::Thumbnail => OutputProfile::thumbnail_default(),
    };
    let (max_width, max_height) = match bounds {
        Some(bounds) => parse_bounds(&bounds)?,
        None => (base.max_width, base.max_height),
    };
    Ok(OutputProfile::new(
        format.unwrap_or(base.format),
        quality.unwrap_or(base.quality),
        max_width,
        max_height,
    ))
}

fn parse_bounds(bounds: &str) -> Result<(u32, u32), CliError> {
    let invalid = || CliError::InvalidArgument(format!("bounds '{}' is not WIDTHxHEIGHT", bounds));
    let (w, h) = bounds.split_once(['x', 'X']).ok_or_else(invalid)?;
    let width: u32 = w.trim().parse().map_err(|_| invalid())?;
    let height: u32 = h.trim().parse().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok((width, height))
}

fn parse_id(id: &str) -> Result<JobId, CliError> {
    id.parse()
        .map_err(|_| CliError::InvalidArgument(format!("'{}' is not a job id", id)))
}

fn print_ack(action: &str, ack: ControlAck) {
    match ack {
        ControlAck::Signalled => println!("{} requested; the run stops after in-flight items", action),
        ControlAck::Applied(status) => println!("Job is now {}", status),
    }
}

fn print_report(report: &JobStatusReport) {
    let progress = &report.progress;
    println!("Job {} ({})", report.id, report.job_type);
    println!("  Status:    {}{}", report.status, if report.active_here { " (running here)" } else { "" });
    println!(
        "  Progress:  {}/{} ({} completed, {} failed, {} skipped)",
        progress.handled(),
        progress.total,
        progress.completed,
        progress.failed,
        progress.skipped
    );
    println!("  Written:   {}", format_size(progress.total_size_bytes));
    println!("  Resumable: {}", if report.can_resume { "yes" } else { "no" });
    if let Some(message) = &report.error_message {
        println!("  Error:     {}", message);
    }
    println!("  Created:   {}", report.created_at.to_rfc3339());
    if let Some(at) = report.last_progress_at {
        println!("  Progress at: {}", at.to_rfc3339());
    }
    if !report.errors.is_empty() {
        println!("  Failed items:");
        for error in &report.errors {
            println!("    {}: {}", error.image_id, error.reason);
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Job {} is {}", summary.job_id, summary.status);
    println!(
        "  {} processed, {} failed, {} skipped, {} already done",
        summary.processed, summary.failed, summary.skipped, summary.already_handled
    );
    println!("  {} written", format_size(summary.bytes_written));
    if summary.deferred > 0 {
        println!(
            "  {} items deferred by storage errors; resume the job to retry them",
            summary.deferred
        );
    }
}
