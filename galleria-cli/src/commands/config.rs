//! Configuration management CLI commands.

use std::path::Path;

use clap::Subcommand;
use galleria::config::ConfigFile;

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Write a commented configuration file with default values
    ///
    /// Does nothing if the file already exists.
    Init,

    /// Print the effective configuration
    Show,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, path: &Path) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => {
            println!("{}", path.display());
            if !path.exists() {
                println!("(file does not exist, defaults are in effect)");
            }
            Ok(())
        }
        ConfigCommands::Init => {
            let existed = path.exists();
            ConfigFile::ensure_exists(path)?;
            if existed {
                println!("Configuration already exists: {}", path.display());
            } else {
                println!("Wrote default configuration to {}", path.display());
            }
            Ok(())
        }
        ConfigCommands::Show => {
            let config = ConfigFile::load_from(path)?;
            print!("{}", config.to_config_string());
            Ok(())
        }
    }
}
