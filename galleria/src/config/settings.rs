//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use std::path::PathBuf;

use crate::jobs::StalePolicy;

/// Complete application configuration loaded from config.ini.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    /// Database settings
    pub storage: StorageSettings,
    /// Generation worker pool and storage retry behaviour
    pub pipeline: PipelineSettings,
    /// Job liveness and retention
    pub jobs: JobsSettings,
    /// Artifact lifetime
    pub artifacts: ArtifactSettings,
    /// Where source images are read from
    pub sources: SourceSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// SQLite database holding folders, jobs and artifacts
    pub database: PathBuf,
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Concurrent workers per job run
    pub workers: usize,
    /// Retries of an item whose storage operations were unavailable
    pub storage_retry_attempts: u32,
    /// Delay before such a retry, in milliseconds
    pub storage_retry_delay_ms: u64,
}

/// Job configuration.
#[derive(Debug, Clone)]
pub struct JobsSettings {
    /// A Running job without progress for this long is stale
    pub stale_after_secs: u64,
    /// Interval between sweeps
    pub sweep_interval_secs: u64,
    /// What a stale job becomes
    pub stale_policy: StalePolicy,
    /// Terminal jobs older than this are deleted; `None` keeps them
    pub retention_days: Option<u64>,
}

/// Artifact configuration.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSettings {
    /// Lifetime of generated artifacts; `None` keeps them until invalidated
    pub ttl_days: Option<u64>,
}

/// Source image configuration.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Directory holding originals, looked up by image id
    pub directory: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    /// Log file path
    pub file: PathBuf,
}
