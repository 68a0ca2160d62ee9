//! Default values and constants for all configuration settings.
//!
//! Contains all `DEFAULT_*` constants and the `ConfigFile::default()`
//! implementation.

use std::path::PathBuf;

use super::file::config_directory;
use super::settings::*;
use crate::jobs::{StalePolicy, DEFAULT_STALE_AFTER_SECS, DEFAULT_SWEEP_INTERVAL_SECS};
use crate::pipeline::{DEFAULT_STORAGE_RETRY_ATTEMPTS, DEFAULT_STORAGE_RETRY_DELAY_MS};

/// Default database file name inside the config directory.
pub const DEFAULT_DATABASE_FILE: &str = "galleria.db";

/// Default log file name inside the config directory.
pub const DEFAULT_LOG_FILE: &str = "galleria.log";

/// Default retention of finished jobs (30 days).
pub const DEFAULT_RETENTION_DAYS: u64 = 30;

/// Get the number of available CPU cores.
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Default worker count: one per core, capped at 8.
///
/// Transforms are CPU-bound and run on the blocking pool, so more workers
/// than cores only adds queueing.
pub fn default_workers() -> usize {
    num_cpus().clamp(1, 8)
}

/// Default database path (~/.galleria/galleria.db).
pub fn default_database_path() -> PathBuf {
    config_directory().join(DEFAULT_DATABASE_FILE)
}

/// Default originals directory (~/.galleria/originals).
pub fn default_source_directory() -> PathBuf {
    config_directory().join("originals")
}

/// Default log file path (~/.galleria/logs/galleria.log).
pub fn default_log_path() -> PathBuf {
    config_directory().join("logs").join(DEFAULT_LOG_FILE)
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            storage: StorageSettings {
                database: default_database_path(),
            },
            pipeline: PipelineSettings {
                workers: default_workers(),
                storage_retry_attempts: DEFAULT_STORAGE_RETRY_ATTEMPTS,
                storage_retry_delay_ms: DEFAULT_STORAGE_RETRY_DELAY_MS,
            },
            jobs: JobsSettings {
                stale_after_secs: DEFAULT_STALE_AFTER_SECS,
                sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
                stale_policy: StalePolicy::default(),
                retention_days: Some(DEFAULT_RETENTION_DAYS),
            },
            artifacts: ArtifactSettings::default(),
            sources: SourceSettings {
                directory: default_source_directory(),
            },
            logging: LoggingSettings {
                file: default_log_path(),
            },
        }
    }
}
