//! Configuration file handling for ~/.galleria/config.ini.
//!
//! Loads and saves user configuration with sensible defaults.
//! Settings structs live in [`super::settings`], constants in [`super::defaults`],
//! parsing in [`super::parser`], and serialization in [`super::writer`].

use ini::Ini;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::settings::ConfigFile;
use crate::pipeline::PipelineConfig;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

impl ConfigFile {
    /// Load configuration from the default path (~/.galleria/config.ini).
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Save configuration to the default path (~/.galleria/config.ini).
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        std::fs::write(path, self.to_config_string())
            .map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Render the configuration as a commented INI document.
    pub fn to_config_string(&self) -> String {
        super::writer::to_config_string(self)
    }

    /// Create the config file at `path` with defaults if it doesn't exist.
    ///
    /// Returns the path to the config file.
    pub fn ensure_exists(path: &Path) -> Result<PathBuf, ConfigFileError> {
        if !path.exists() {
            Self::default().save_to(path)?;
        }
        Ok(path.to_path_buf())
    }

    /// Pipeline tuning derived from the `[pipeline]` and `[artifacts]` sections.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::default()
            .with_workers(self.pipeline.workers)
            .with_storage_retry(
                self.pipeline.storage_retry_attempts,
                Duration::from_millis(self.pipeline.storage_retry_delay_ms),
            )
            .with_artifact_ttl(self.artifacts.ttl_days.map(days))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.jobs.stale_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.jobs.sweep_interval_secs)
    }

    pub fn retention(&self) -> Option<Duration> {
        self.jobs.retention_days.map(days)
    }
}

fn days(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(SECONDS_PER_DAY))
}

/// Get the path to the config directory (~/.galleria).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".galleria")
}

/// Get the path to the config file (~/.galleria/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
