//! Configuration for Galleria.
//!
//! User configuration lives in an INI file at `~/.galleria/config.ini`.
//! [`ConfigFile::load`] starts from defaults and overlays whatever the file
//! sets, so a missing file or a partial one is always valid.
//!
//! # Example
//!
//! ```
//! use galleria::config::{parse_size, ConfigFile};
//!
//! let config = ConfigFile::default();
//! assert!(config.pipeline.workers >= 1);
//!
//! assert_eq!(parse_size("20GB").unwrap(), 20 * 1024 * 1024 * 1024);
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod size;
mod writer;

pub use defaults::{
    default_database_path, default_log_path, default_source_directory, default_workers, DEFAULT_DATABASE_FILE,
    DEFAULT_LOG_FILE, DEFAULT_RETENTION_DAYS,
};
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    ArtifactSettings, ConfigFile, JobsSettings, LoggingSettings, PipelineSettings,
    SourceSettings, StorageSettings,
};
pub use size::{format_size, parse_size, Size, SizeParseError};
