//! Keyshift Command-Line Tool
//!
//! Migrates the integer primary keys of a point-of-sale SQLite database to
//! UUIDs, with validation and automatic rollback.

mod commands;
mod config;
mod formatter;
mod seed;

use clap::Parser;
use config::{Args, Command};
use keyshift_core::{SqliteStorage, Storage};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyshift=info,keyshift_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&args.database)?);
    let formatter = formatter::create_formatter(args.format);
    tracing::debug!(database = %args.database.display(), format = %args.format, "opened database");

    match &args.command {
        Command::Migrate(migrate) => commands::migrate(storage, migrate, &*formatter).await,
        Command::Validate { batch_size } => {
            commands::validate(storage.as_ref(), *batch_size, &*formatter).await
        }
        Command::Status => commands::status(storage.as_ref(), &*formatter).await,
        Command::Seed(seed) => commands::seed(storage.as_ref(), seed, &*formatter).await,
    }
}
