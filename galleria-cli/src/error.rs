//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;
use galleria::config::ConfigFileError;
use galleria::folders::AdminError;
use galleria::jobs::JobError;
use galleria::service::ServiceError;
use galleria::store::StoreError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Invalid command-line argument
    InvalidArgument(String),
    /// Service operation failed
    Service(ServiceError),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Service(e) if e.is_unavailable() => {
                eprintln!();
                eprintln!("The database could not be reached. Nothing was recorded.");
                eprintln!("Retry the command; interrupted jobs resume from their last item.");
            }
            CliError::Service(ServiceError::Admin(AdminError::FolderNotEmpty { .. })) => {
                eprintln!();
                eprintln!("Use --force to delete the folder and drop its artifact records.");
            }
            CliError::Service(ServiceError::JobsRunning(_)) => {
                eprintln!();
                eprintln!("Counts from a running job would be lost. Pause running jobs first,");
                eprintln!("or use --force if they are known to be abandoned.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::Service(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Service(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ServiceError> for CliError {
    fn from(e: ServiceError) -> Self {
        CliError::Service(e)
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<JobError> for CliError {
    fn from(e: JobError) -> Self {
        CliError::Service(e.into())
    }
}

impl From<AdminError> for CliError {
    fn from(e: AdminError) -> Self {
        CliError::Service(e.into())
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        CliError::Service(e.into())
    }
}
