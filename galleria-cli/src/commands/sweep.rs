//! Maintenance sweep CLI commands.

use std::time::Duration;

use chrono::Utc;
use clap::Subcommand;
use galleria::config::format_size;
use galleria::jobs::StalePolicy;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::CliError;
use crate::runner::CliRunner;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Sweep subcommands.
#[derive(Debug, Subcommand)]
pub enum SweepCommands {
    /// Fail or pause Running jobs that stopped making progress
    Stale {
        /// What stale jobs become: fail or pause (config default if omitted)
        #[arg(long)]
        policy: Option<StalePolicy>,

        /// Seconds without progress before a job counts as stale
        #[arg(long)]
        stale_after: Option<u64>,
    },

    /// Delete finished jobs older than the retention period
    Retention {
        /// Retention in days (config default if omitted)
        #[arg(long)]
        days: Option<u64>,
    },

    /// Remove expired and invalidated artifacts
    Expired,

    /// Run all sweeps periodically until Ctrl-C
    Daemon,
}

/// Run a sweep subcommand.
pub async fn run(command: SweepCommands, runner: &CliRunner) -> Result<(), CliError> {
    runner.log_startup("sweep");
    let service = runner.create_service()?;

    match command {
        SweepCommands::Stale {
            policy,
            stale_after,
        } => {
            let mut sweeper = service.sweeper();
            if let Some(policy) = policy {
                sweeper = sweeper.with_policy(policy);
            }
            if let Some(secs) = stale_after {
                sweeper = sweeper.with_stale_after(Duration::from_secs(secs));
            }

            let (flipped, _) = sweeper.sweep_stale()?;
            println!(
                "{} stale jobs set to {} (no progress for {}s)",
                flipped,
                sweeper.policy(),
                sweeper.stale_after().as_secs()
            );
        }
        SweepCommands::Retention { days } => {
            let retention = match days {
                Some(days) => Some(Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY))),
                None => runner.config().retention(),
            };
            let Some(retention) = retention else {
                println!("Job retention is disabled; nothing to purge.");
                return Ok(());
            };
            let purged = service.jobs().tracker().purge_terminal_jobs(retention)?;
            println!("Deleted {} finished jobs", purged);
        }
        SweepCommands::Expired => {
            let report = service.janitor().purge_expired(Utc::now()).await?;
            println!(
                "Removed {} artifacts, freed {}",
                report.removed,
                format_size(report.bytes_freed)
            );
            if report.files_missing > 0 {
                println!("  {} records had no file on disk", report.files_missing);
            }
            if report.failed > 0 {
                println!("  {} artifacts could not be deleted and were kept", report.failed);
            }
        }
        SweepCommands::Daemon => {
            let shutdown = CancellationToken::new();
            let handle = service.spawn_sweeper(shutdown.clone());
            println!("Sweeper running (Ctrl-C to stop)");

            tokio::signal::ctrl_c()
                .await
                .map_err(|e| CliError::InvalidArgument(format!("signal handler: {}", e)))?;
            info!("Interrupt received, stopping sweeper");
            shutdown.cancel();
            let _ = handle.await;
        }
    }

    Ok(())
}
