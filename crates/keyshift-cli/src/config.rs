//! Command-line arguments and the migration configuration built from them.

use clap::{Args as ClapArgs, Parser, Subcommand};
use keyshift_core::migration::{MigrationConfig, DEFAULT_BATCH_SIZE};
use std::path::PathBuf;

use crate::formatter::OutputFormat;

/// Keyshift - migrate integer primary keys to UUIDs.
#[derive(Parser, Debug)]
#[command(name = "keyshift")]
#[command(version, about = "Migrate integer primary keys to UUIDs")]
pub struct Args {
    /// Path to the SQLite database
    #[arg(short, long, global = true, default_value = "pos.db")]
    pub database: PathBuf,

    /// Output format
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Back up, migrate and validate every table
    Migrate(MigrateArgs),
    /// Run the validation battery against the current data
    Validate {
        /// Rows fetched per page
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },
    /// Show whether the database has been migrated
    Status,
    /// Create the legacy schema and fill it with synthetic rows
    Seed(SeedArgs),
}

/// Arguments for `keyshift migrate`.
#[derive(ClapArgs, Debug, Clone)]
pub struct MigrateArgs {
    /// Rows fetched per page
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Keep the backup tables after a successful run
    #[arg(long)]
    pub keep_backup: bool,

    /// Write a JSON map of legacy ids to new identifiers
    #[arg(long)]
    pub audit_map: Option<PathBuf>,
}

impl From<&MigrateArgs> for MigrationConfig {
    fn from(args: &MigrateArgs) -> Self {
        Self {
            batch_size: args.batch_size.max(1),
            keep_backup: args.keep_backup,
            audit_map: args.audit_map.clone(),
            ..MigrationConfig::default()
        }
    }
}

/// Arguments for `keyshift seed`.
#[derive(ClapArgs, Debug, Clone)]
pub struct SeedArgs {
    /// Rows per table
    #[arg(long, default_value_t = 100)]
    pub rows: usize,

    /// RNG seed, for reproducible data
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}
