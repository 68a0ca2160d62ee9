//! Cache folder administration CLI commands.

use std::path::PathBuf;

use clap::Subcommand;
use galleria::config::{format_size, parse_size};
use galleria::folders::{CacheFolder, FolderUpdate, NewCacheFolder};
use galleria::ids::FolderId;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Folder subcommands.
#[derive(Debug, Subcommand)]
pub enum FolderCommands {
    /// Register a new cache folder
    Add {
        /// Display name
        name: String,

        /// Root directory for artifacts (created if missing)
        path: PathBuf,

        /// Allocation priority; lower numbers are filled first
        #[arg(long, default_value = "1")]
        priority: i32,

        /// Capacity limit, e.g. 500MB or 20GB (unlimited if omitted)
        #[arg(long)]
        max_size: Option<String>,

        /// Register the folder without using it for new artifacts
        #[arg(long)]
        inactive: bool,
    },

    /// Change a cache folder's settings
    Update {
        /// Folder id
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        path: Option<PathBuf>,

        #[arg(long)]
        priority: Option<i32>,

        /// New capacity limit, e.g. 20GB
        #[arg(long, conflicts_with = "unlimited")]
        max_size: Option<String>,

        /// Remove the capacity limit
        #[arg(long)]
        unlimited: bool,

        /// Use the folder for new artifacts
        #[arg(long, conflicts_with = "deactivate")]
        activate: bool,

        /// Stop using the folder for new artifacts
        #[arg(long)]
        deactivate: bool,
    },

    /// Delete a cache folder
    ///
    /// Refused while the folder still holds artifacts unless --force is given.
    /// Forcing drops the artifact records; files on disk are left in place.
    Remove {
        /// Folder id
        id: String,

        #[arg(long)]
        force: bool,
    },

    /// List cache folders in allocation order
    List,

    /// Show totals across all cache folders
    Stats,

    /// Check that a path can be used as a cache folder
    Validate { path: PathBuf },

    /// Recompute size counters from artifact records
    Reconcile {
        /// Folder id (all folders if omitted)
        id: Option<String>,

        /// Reconcile even while jobs are marked running
        #[arg(long)]
        force: bool,
    },
}

/// Run a folder subcommand.
pub fn run(command: FolderCommands, runner: &CliRunner) -> Result<(), CliError> {
    runner.log_startup("folder");
    let service = runner.create_service()?;
    let admin = service.folders();

    match command {
        FolderCommands::Add {
            name,
            path,
            priority,
            max_size,
            inactive,
        } => {
            let mut request = NewCacheFolder::new(name, path, priority).with_active(!inactive);
            if let Some(size) = max_size {
                request = request.with_max_size(parse_capacity(&size)?);
            }
            let folder = admin.create(request)?;
            println!("Created cache folder {}", folder.id);
            print_folder(&folder);
        }
        FolderCommands::Update {
            id,
            name,
            path,
            priority,
            max_size,
            unlimited,
            activate,
            deactivate,
        } => {
            let max_size_bytes = match (max_size, unlimited) {
                (Some(size), _) => Some(Some(parse_capacity(&size)?)),
                (None, true) => Some(None),
                (None, false) => None,
            };
            let is_active = match (activate, deactivate) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let update = FolderUpdate {
                name,
                path,
                priority,
                max_size_bytes,
                is_active,
            };
            if update.is_empty() {
                return Err(CliError::InvalidArgument("nothing to update".to_string()));
            }
            let folder = admin.update(&parse_id(&id)?, &update)?;
            println!("Updated cache folder {}", folder.id);
            print_folder(&folder);
        }
        FolderCommands::Remove { id, force } => {
            let folder = admin.delete(&parse_id(&id)?, force)?;
            println!("Removed cache folder {} ({})", folder.name, folder.id);
            if force && folder.total_files > 0 {
                println!(
                    "  {} files ({}) remain on disk under {}",
                    folder.total_files,
                    format_size(folder.current_size_bytes),
                    folder.path.display()
                );
            }
        }
        FolderCommands::List => {
            let folders = admin.list()?;
            if folders.is_empty() {
                println!("No cache folders configured.");
                println!("Add one with: galleria folder add <name> <path>");
            }
            for folder in &folders {
                print_folder(folder);
                println!();
            }
        }
        FolderCommands::Stats => {
            let stats = admin.stats()?;
            println!("Cache folders: {} ({} active)", stats.folder_count, stats.active_count);
            println!("  Size:             {}", format_size(stats.total_size_bytes));
            println!("  Files:            {}", stats.total_files);
            println!("  Average priority: {:.2}", stats.average_priority);
        }
        FolderCommands::Validate { path } => {
            admin.validate_path(&path)?;
            println!("✓ {} is usable as a cache folder", path.display());
        }
        FolderCommands::Reconcile { id, force } => {
            let id = id.as_deref().map(parse_id).transpose()?;
            let results = service.reconcile_folders(id.as_ref(), force)?;
            for result in &results {
                if result.changed() {
                    println!(
                        "{}: {} -> {} ({} -> {} files)",
                        result.folder_id,
                        format_size(result.previous_bytes),
                        format_size(result.actual_bytes),
                        result.previous_files,
                        result.actual_files
                    );
                } else {
                    println!("{}: consistent", result.folder_id);
                }
            }
        }
    }

    Ok(())
}

fn parse_id(id: &str) -> Result<FolderId, CliError> {
    id.parse()
        .map_err(|_| CliError::InvalidArgument(format!("'{}' is not a folder id", id)))
}

fn parse_capacity(size: &str) -> Result<u64, CliError> {
    parse_size(size).map_err(|e| CliError::InvalidArgument(format!("max size: {}", e)))
}

fn print_folder(folder: &CacheFolder) {
    let capacity = folder
        .max_size_bytes
        .map(format_size)
        .unwrap_or_else(|| "unlimited".to_string());

    println!("{} [{}]", folder.name, folder.id);
    println!("  Path:     {}", folder.path.display());
    println!("  Priority: {}", folder.priority);
    println!(
        "  Used:     {} of {} ({} files)",
        format_size(folder.current_size_bytes),
        capacity,
        folder.total_files
    );
    println!("  Active:   {}", if folder.is_active { "yes" } else { "no" });
}
