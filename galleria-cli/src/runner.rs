//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading, logging initialization and service creation
//! to reduce duplication across command handlers.

use std::path::{Path, PathBuf};

use galleria::config::{config_file_path, ConfigFile};
use galleria::logging::{init_logging, LoggingGuard};
use galleria::service::{DefaultTransform, GalleriaService};
use tracing::info;

use crate::error::CliError;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
    /// Where the configuration was loaded from
    config_path: PathBuf,
}

impl CliRunner {
    /// Create a new CLI runner, loading config and initializing logging.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Config file to load instead of `~/.galleria/config.ini`
    /// * `verbose` - Mirror log output to stderr
    pub fn new(config_path: Option<&Path>, verbose: bool) -> Result<Self, CliError> {
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(config_file_path);
        let config = ConfigFile::load_from(&config_path)?;

        let logging_guard = init_logging(&config.logging.file, verbose)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
            config_path,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("Galleria v{}", galleria::VERSION);
        info!(config = %self.config_path.display(), "Galleria CLI: {} command", command);
    }

    /// Open the service on the configured database.
    pub fn create_service(&self) -> Result<GalleriaService<DefaultTransform>, CliError> {
        GalleriaService::open(&self.config)
            .map_err(CliError::from)
            .inspect(|_| info!("Service created successfully"))
    }
}
