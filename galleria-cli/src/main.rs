//! Galleria CLI - Command-line interface
//!
//! Operator front end for the Galleria cache engine: cache folder
//! administration, cache-generation jobs and maintenance sweeps.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use commands::config::ConfigCommands;
use commands::folder::FolderCommands;
use commands::job::JobCommands;
use commands::sweep::SweepCommands;
use error::CliError;
use galleria::config::config_file_path;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "galleria")]
#[command(version = galleria::VERSION)]
#[command(about = "Manage Galleria cache folders and cache-generation jobs", long_about = None)]
struct Cli {
    /// Config file (default: ~/.galleria/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Mirror log output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage cache folders
    Folder {
        #[command(subcommand)]
        command: FolderCommands,
    },

    /// Submit, inspect and control jobs
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Run maintenance sweeps
    Sweep {
        #[command(subcommand)]
        command: SweepCommands,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli).await {
        e.exit();
    }
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let runner = match cli.command {
        // Config commands must work before logging or the database exist.
        Commands::Config { command } => {
            let path = cli.config.unwrap_or_else(config_file_path);
            return commands::config::run(command, &path);
        }
        _ => CliRunner::new(cli.config.as_deref(), cli.verbose)?,
    };

    match cli.command {
        Commands::Folder { command } => commands::folder::run(command, &runner),
        Commands::Job { command } => commands::job::run(command, &runner).await,
        Commands::Sweep { command } => commands::sweep::run(command, &runner).await,
        Commands::Config { .. } => Ok(()),
    }
}
