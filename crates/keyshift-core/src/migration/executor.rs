//! Migration executor - orchestrates a full key migration.
//!
//! Sequences backup, per-table migration with reference rewriting,
//! validation, and rollback, and condenses the outcome into a
//! [`MigrationReport`]. Expected failures never escape as errors; they end
//! up in the report.
//!
//! A run that was killed before finishing leaves its backup manifest in the
//! store. The next run restores from it before looking at the key layout.

use super::audit::write_audit_map;
use super::backup::Backup;
use super::error::MigrationError;
use super::keygen::KeyGenerator;
use super::report::{CategoryResult, MigrationReport, ValidationCategory, ValidationReport};
use super::rewrite::ReferenceRewriter;
use super::state::{MigrationState, MigrationStatus};
use super::table::{IdMapping, IdMappings, TableMigrator, DEFAULT_BATCH_SIZE};
use super::validator::Validator;
use crate::schema::{Schema, TableDef, ID_COLUMN};
use crate::storage::{column_type, Storage};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Warning recorded when every table already has identifier keys.
pub const ALREADY_COMPLETED_WARNING: &str = "Migration was already completed previously";

/// Warning recorded when a failed run was restored.
pub const ROLLBACK_COMPLETED_WARNING: &str = "Rollback completed successfully";

/// Migration executor configuration.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Rows fetched per page while migrating, rewriting and validating.
    pub batch_size: usize,
    /// Keep the `__keyshift_backup_*` tables after a successful run.
    pub keep_backup: bool,
    /// Where to write the legacy-id audit map after a successful run.
    pub audit_map: Option<PathBuf>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            keep_backup: false,
            audit_map: None,
        }
    }
}

/// Requests cancellation of a running migration.
///
/// Cancellation is honoured between steps: the step in flight finishes,
/// then the run rolls back.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Migration executor - orchestrates the migration workflow.
pub struct MigrationExecutor {
    storage: Arc<dyn Storage>,
    keygen: Arc<dyn KeyGenerator>,
    schema: Schema,
    config: MigrationConfig,
    cancel: CancelHandle,
}

impl MigrationExecutor {
    /// Create a new migration executor.
    pub fn new(
        storage: Arc<dyn Storage>,
        keygen: Arc<dyn KeyGenerator>,
        schema: Schema,
        config: MigrationConfig,
    ) -> Self {
        Self {
            storage,
            keygen,
            schema,
            config,
            cancel: CancelHandle::default(),
        }
    }

    /// The schema being migrated.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Handle for cancelling a run from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Tables whose `id` column is already an identifier, in schema order.
    ///
    /// Fails if a declared table or its `id` column does not exist.
    pub async fn migrated_tables(&self) -> Result<Vec<String>, MigrationError> {
        let mut migrated = Vec::new();
        for table in &self.schema.tables {
            match column_type(self.storage.as_ref(), &table.name, ID_COLUMN).await? {
                Some(t) if t == "TEXT" => migrated.push(table.name.clone()),
                Some(_) => {}
                None => {
                    return Err(MigrationError::SchemaMismatch {
                        table: table.name.clone(),
                        message: "table or id column not found".to_string(),
                    })
                }
            }
        }
        Ok(migrated)
    }

    /// Whether every table already has identifier keys.
    pub async fn is_migrated(&self) -> Result<bool, MigrationError> {
        Ok(self.migrated_tables().await?.len() == self.schema.tables.len())
    }

    /// Run the validation battery without a row-count baseline.
    pub async fn validate(&self) -> ValidationReport {
        Validator::new(self.storage.as_ref(), &self.schema, self.config.batch_size)
            .validate(None)
            .await
    }

    /// Migrate every table to identifier keys.
    ///
    /// Runs at most once per store: if every table already has identifier
    /// keys the run ends immediately as `AlreadyComplete`. A store where only
    /// some tables do, with no backup to recover from, is refused untouched.
    /// Assumes exclusive access to the store for its duration.
    pub async fn execute_migration(&self) -> MigrationReport {
        let mut report = MigrationReport::new();

        let order = match self.schema.migration_order() {
            Ok(order) => order,
            Err(e) => {
                report.errors.push(MigrationError::from(e).to_string());
                report.status = MigrationStatus::Failed;
                return report;
            }
        };
        let mut state = MigrationState::new(order.iter().map(|t| t.name.as_str()));
        tracing::info!(tables = order.len(), "starting key migration");

        if let Err(e) = self.recover(&mut report).await {
            tracing::error!(error = %e, "could not recover interrupted migration");
            state.transition(MigrationStatus::Failed);
            report.errors.push(e.to_string());
            report.status = state.status;
            return report;
        }

        let layout = match self.migrated_tables().await {
            Ok(migrated) if migrated.len() == order.len() => {
                state.transition(MigrationStatus::AlreadyComplete);
                tracing::info!("all tables already have identifier keys, nothing to do");
                report.success = true;
                report.status = state.status;
                report.warnings.push(ALREADY_COMPLETED_WARNING.to_string());
                return report;
            }
            Ok(migrated) if !migrated.is_empty() => {
                Err(MigrationError::PartiallyMigrated { tables: migrated })
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = layout {
            tracing::error!(error = %e, "key layout check failed");
            state.transition(MigrationStatus::Failed);
            report.errors.push(e.to_string());
            report.status = state.status;
            return report;
        }

        let mut backup = Backup::new();
        match self
            .run_phases(&order, &mut state, &mut backup, &mut report)
            .await
        {
            Ok(()) => {
                state.transition(MigrationStatus::Complete);
                report.success = true;
                tracing::info!(
                    records = report.total_records(),
                    elapsed_ms = state.elapsed().num_milliseconds(),
                    "key migration complete"
                );
            }
            Err(e) => {
                tracing::error!(status = %state.status, error = %e, "key migration failed");
                report.errors.push(e.to_string());
                self.roll_back(&backup, &mut state, &mut report).await;
            }
        }

        report.status = state.status;
        report.tables = state.tables;
        report
    }

    /// Restore the backup an interrupted run left behind, if there is one.
    async fn recover(&self, report: &mut MigrationReport) -> Result<(), MigrationError> {
        let storage = self.storage.as_ref();
        let Some(backup) = Backup::load(storage).await? else {
            return Ok(());
        };
        backup
            .restore(storage)
            .await
            .map_err(|e| MigrationError::RecoveryFailed {
                reason: e.to_string(),
            })?;
        let restored = backup.snapshots().len();
        tracing::warn!(tables = restored, "restored backup left by an interrupted migration");
        report.warnings.push(format!(
            "recovered an interrupted migration; restored {restored} tables"
        ));
        Ok(())
    }

    async fn run_phases(
        &self,
        order: &[&TableDef],
        state: &mut MigrationState,
        backup: &mut Backup,
        report: &mut MigrationReport,
    ) -> Result<(), MigrationError> {
        let storage = self.storage.as_ref();

        state.transition(MigrationStatus::BackingUp);
        for table in order {
            self.check_cancelled()?;
            backup.capture(storage, &table.name).await?;
        }

        state.transition(MigrationStatus::Migrating);
        let migrator = TableMigrator::new(storage, self.keygen.as_ref(), self.config.batch_size);
        let rewriter = ReferenceRewriter::new(storage, self.config.batch_size);
        let mut mappings = IdMappings::new();

        for table in order {
            self.check_cancelled()?;
            if let Some(progress) = state.table_mut(&table.name) {
                progress.start();
            }

            match migrator.migrate(table).await {
                Ok(migrated) => {
                    if let Some(progress) = state.table_mut(&table.name) {
                        progress.complete(migrated.migrated_count);
                    }
                    report
                        .records_migrated
                        .insert(table.name.clone(), migrated.migrated_count);
                    mappings.insert(table.name.clone(), migrated.mapping);
                }
                Err(e) if e.is_informational() => {
                    if let Some(progress) = state.table_mut(&table.name) {
                        progress.skip();
                    }
                    tracing::warn!(table = %table.name, "table already migrated, skipping");
                    report.warnings.push(format!("{e}; skipped"));
                    report.records_migrated.insert(table.name.clone(), 0);
                    mappings.insert(table.name.clone(), IdMapping::new());
                }
                Err(e @ MigrationError::DuplicateIdentifier { .. }) => {
                    if let Some(progress) = state.table_mut(&table.name) {
                        progress.fail(e.to_string());
                    }
                    let validation = ValidationReport::from_results(BTreeMap::from([(
                        ValidationCategory::DataIntegrity,
                        CategoryResult::from_errors(vec![e.to_string()]),
                    )]));
                    let message = validation.failure_summary();
                    report.validation_report = Some(validation);
                    return Err(MigrationError::ValidationFailed { message });
                }
                Err(e) => {
                    if let Some(progress) = state.table_mut(&table.name) {
                        progress.fail(e.to_string());
                    }
                    return Err(e);
                }
            }
            report.tables_processed.push(table.name.clone());

            for (dependent, columns) in self.schema.dependents_of(&table.name) {
                self.check_cancelled()?;
                let outcome = rewriter.rewrite(dependent, &columns, &mappings).await?;
                report.warnings.extend(outcome.warnings);
            }
        }

        state.transition(MigrationStatus::Validating);
        self.check_cancelled()?;
        let expected = backup.row_counts();
        let validation = Validator::new(storage, &self.schema, self.config.batch_size)
            .validate(Some(&expected))
            .await;
        let passed = validation.success;
        let summary = validation.failure_summary();
        report.validation_report = Some(validation);
        if !passed {
            return Err(MigrationError::ValidationFailed { message: summary });
        }

        if let Some(path) = &self.config.audit_map {
            if let Err(e) = write_audit_map(path, &mappings) {
                tracing::warn!(error = %e, "audit map not written");
                report.warnings.push(format!("audit map not written: {e}"));
            }
        }
        drop(mappings);

        backup.release(storage).await?;
        if self.config.keep_backup {
            report
                .warnings
                .push("backup tables kept (__keyshift_backup_*)".to_string());
        } else if let Err(e) = backup.discard(storage).await {
            tracing::warn!(error = %e, "backup tables not removed");
            report.warnings.push(format!("backup tables not removed: {e}"));
        }
        Ok(())
    }

    async fn roll_back(
        &self,
        backup: &Backup,
        state: &mut MigrationState,
        report: &mut MigrationReport,
    ) {
        state.transition(MigrationStatus::RollingBack);
        match backup.restore(self.storage.as_ref()).await {
            Ok(()) => {
                tracing::warn!(tables = backup.snapshots().len(), "migration rolled back");
                report.warnings.push(ROLLBACK_COMPLETED_WARNING.to_string());
            }
            Err(e) => {
                let err = MigrationError::RollbackFailed {
                    reason: e.to_string(),
                };
                tracing::error!(error = %err, "rollback failed, store may be partially migrated");
                report.errors.push(err.to_string());
            }
        }
        state.transition(MigrationStatus::Failed);
        report.success = false;
    }

    fn check_cancelled(&self) -> Result<(), MigrationError> {
        if self.cancel.is_cancelled() {
            Err(MigrationError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::keygen::UuidGenerator;
    use crate::migration::state::TableStatus;
    use crate::schema::{ColumnDef, ColumnType};
    use crate::storage::{count_rows, SqliteStorage, Value};

    fn schema() -> Schema {
        Schema::new()
            .with_table(
                TableDef::new("categories", 0).with_column(ColumnDef::new("name", ColumnType::Text)),
            )
            .with_table(
                TableDef::new("products", 1)
                    .with_column(ColumnDef::new("name", ColumnType::Text))
                    .with_column(ColumnDef::optional_foreign_key("category_id", "categories")),
            )
    }

    async fn executor(config: MigrationConfig) -> (Arc<SqliteStorage>, MigrationExecutor) {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let schema = schema();
        for table in &schema.tables {
            storage.execute(&table.legacy_ddl()).await.unwrap();
        }
        storage
            .execute("INSERT INTO categories (name) VALUES ('tools'), ('food')")
            .await
            .unwrap();
        storage
            .execute("INSERT INTO products (name, category_id) VALUES ('hammer', 1), ('bread', 2), ('misc', NULL)")
            .await
            .unwrap();

        let executor = MigrationExecutor::new(
            storage.clone(),
            Arc::new(UuidGenerator),
            schema,
            config,
        );
        (storage, executor)
    }

    #[tokio::test]
    async fn test_executes_and_reports() {
        let (storage, executor) = executor(MigrationConfig::default()).await;
        assert!(!executor.is_migrated().await.unwrap());

        let report = executor.execute_migration().await;
        assert!(report.success, "{:?}", report.errors);
        assert_eq!(report.status, MigrationStatus::Complete);
        assert_eq!(report.tables_processed, vec!["categories", "products"]);
        assert_eq!(report.records_migrated.get("categories"), Some(&2));
        assert_eq!(report.records_migrated.get("products"), Some(&3));
        assert!(report.validation_report.as_ref().unwrap().success);
        assert_eq!(report.tables.len(), 2);
        assert!(report.tables.iter().all(|t| t.status == TableStatus::Complete));
        assert_eq!(report.tables[1].table, "products");
        assert_eq!(report.tables[1].migrated_count, 3);
        assert!(executor.is_migrated().await.unwrap());

        let hammer = storage
            .get_first(
                "SELECT c.name FROM products p JOIN categories c ON c.id = p.category_id WHERE p.name = 'hammer'",
                &[],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hammer.get_text(0).unwrap(), "tools");
        assert!(count_rows(storage.as_ref(), "__keyshift_backup_categories").await.is_err());
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let (_storage, executor) = executor(MigrationConfig::default()).await;
        assert!(executor.execute_migration().await.success);

        let second = executor.execute_migration().await;
        assert!(second.success);
        assert_eq!(second.status, MigrationStatus::AlreadyComplete);
        assert_eq!(second.warnings, vec![ALREADY_COMPLETED_WARNING]);
        assert!(second.tables_processed.is_empty());
        assert!(second.validation_report.is_none());
    }

    #[tokio::test]
    async fn test_keep_backup() {
        let config = MigrationConfig {
            keep_backup: true,
            ..MigrationConfig::default()
        };
        let (storage, executor) = executor(config).await;
        let report = executor.execute_migration().await;
        assert!(report.success);
        assert_eq!(
            count_rows(storage.as_ref(), "__keyshift_backup_products").await.unwrap(),
            3
        );
        assert!(Backup::load(storage.as_ref()).await.unwrap().is_none());

        let second = executor.execute_migration().await;
        assert_eq!(second.status, MigrationStatus::AlreadyComplete);
    }

    #[tokio::test]
    async fn test_cancelled_run_rolls_back() {
        let (storage, executor) = executor(MigrationConfig::default()).await;
        executor.cancel_handle().cancel();

        let report = executor.execute_migration().await;
        assert!(!report.success);
        assert_eq!(report.status, MigrationStatus::Failed);
        assert_eq!(report.errors, vec!["migration cancelled"]);
        assert!(report.warnings.contains(&ROLLBACK_COMPLETED_WARNING.to_string()));
        assert!(!executor.is_migrated().await.unwrap());
        assert_eq!(count_rows(storage.as_ref(), "products").await.unwrap(), 3);
        assert!(report.tables.iter().all(|t| t.status == TableStatus::Pending));
        assert!(Backup::load(storage.as_ref()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_layout_is_refused() {
        let (storage, executor) = executor(MigrationConfig::default()).await;
        storage
            .execute(
                "DROP TABLE categories;
                 CREATE TABLE categories (id TEXT PRIMARY KEY NOT NULL, name TEXT NOT NULL);",
            )
            .await
            .unwrap();

        let report = executor.execute_migration().await;
        assert!(!report.success);
        assert_eq!(report.status, MigrationStatus::Failed);
        assert!(report.errors[0].starts_with("store is partially migrated (identifier keys in categories)"));
        assert!(report.warnings.is_empty());
        assert_eq!(
            column_type(storage.as_ref(), "products", "id").await.unwrap().as_deref(),
            Some("INTEGER")
        );
        assert_eq!(count_rows(storage.as_ref(), "products").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_missing_table_reports_error() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let executor = MigrationExecutor::new(
            storage,
            Arc::new(UuidGenerator),
            schema(),
            MigrationConfig::default(),
        );
        let report = executor.execute_migration().await;
        assert!(!report.success);
        assert_eq!(report.status, MigrationStatus::Failed);
        assert_eq!(
            report.errors[0],
            "schema mismatch in categories: table or id column not found"
        );
        assert!(!report.warnings.contains(&ROLLBACK_COMPLETED_WARNING.to_string()));
    }

    #[tokio::test]
    async fn test_standalone_validate() {
        let (storage, executor) = executor(MigrationConfig::default()).await;
        executor.execute_migration().await;
        storage
            .run(
                "UPDATE products SET category_id = ?1 WHERE name = 'misc'",
                &[Value::from("4f3e2d1c-0b9a-4876-a543-210fedcba987")],
            )
            .await
            .unwrap();

        let report = executor.validate().await;
        assert!(!report.success);
        assert!(!report.category(ValidationCategory::ForeignKeys).unwrap().passed);
        assert!(report.category(ValidationCategory::RecordCounts).unwrap().passed);
    }
}
