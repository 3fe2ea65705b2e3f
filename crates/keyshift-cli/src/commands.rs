//! Subcommand handlers.

use crate::config::{MigrateArgs, SeedArgs};
use crate::formatter::{Formatter, StatusSummary, TableSummary};
use crate::seed;
use keyshift_core::migration::{MigrationConfig, MigrationExecutor, UuidGenerator, Validator};
use keyshift_core::schema::{Schema, ID_COLUMN};
use keyshift_core::storage::{column_type, count_rows};
use keyshift_core::Storage;
use std::sync::Arc;

type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Run a full migration and print its report.
pub async fn migrate(
    storage: Arc<dyn Storage>,
    args: &MigrateArgs,
    formatter: &dyn Formatter,
) -> CommandResult {
    let executor = MigrationExecutor::new(
        storage,
        Arc::new(UuidGenerator),
        Schema::point_of_sale(),
        MigrationConfig::from(args),
    );

    let cancel = executor.cancel_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling after the current step");
            cancel.cancel();
        }
    });

    let report = executor.execute_migration().await;
    ctrl_c.abort();

    println!("{}", formatter.format_migration_report(&report));
    if report.success {
        Ok(())
    } else {
        Err("migration failed".into())
    }
}

/// Validate the current data without a row-count baseline.
pub async fn validate(
    storage: &dyn Storage,
    batch_size: usize,
    formatter: &dyn Formatter,
) -> CommandResult {
    let schema = Schema::point_of_sale();
    let report = Validator::new(storage, &schema, batch_size.max(1))
        .validate(None)
        .await;

    println!("{}", formatter.format_validation_report(&report));
    if report.success {
        Ok(())
    } else {
        Err("validation failed".into())
    }
}

/// Report each table's key type and row count.
pub async fn status(storage: &dyn Storage, formatter: &dyn Formatter) -> CommandResult {
    let schema = Schema::point_of_sale();
    let mut tables = Vec::with_capacity(schema.tables.len());
    for table in schema.migration_order()? {
        let id_type = column_type(storage, &table.name, ID_COLUMN).await?;
        let rows = match id_type {
            Some(_) => Some(count_rows(storage, &table.name).await?),
            None => None,
        };
        tables.push(TableSummary {
            table: table.name.clone(),
            id_type,
            rows,
        });
    }

    let migrated = !tables.is_empty()
        && tables
            .iter()
            .all(|t| t.id_type.as_deref() == Some("TEXT"));
    println!(
        "{}",
        formatter.format_status(&StatusSummary { migrated, tables })
    );
    Ok(())
}

/// Create the legacy schema and synthetic rows.
pub async fn seed(storage: &dyn Storage, args: &SeedArgs, formatter: &dyn Formatter) -> CommandResult {
    let counts = seed::seed(storage, &Schema::point_of_sale(), args.rows, args.seed).await?;
    tracing::info!(rows = args.rows, seed = args.seed, "database seeded");
    println!("{}", formatter.format_seed(&counts));
    Ok(())
}
