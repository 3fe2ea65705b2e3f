//! Snapshot and restore of tables for rollback.
//!
//! Each table's DDL, index DDL, rows and AUTOINCREMENT counter are captured
//! before any mutation. Restore puts every captured table back exactly as it
//! was, in one transaction.
//!
//! Snapshot metadata is also written to a manifest table inside the store, so
//! a run that dies midway leaves enough behind for the next run to restore
//! from. The manifest exists exactly as long as the backup is live.

use super::table::staging_table_name;
use crate::error::Error;
use crate::storage::{count_rows, quote_ident, Storage, Value};
use std::collections::BTreeMap;

/// Backup table name for `table`.
pub fn backup_table_name(table: &str) -> String {
    format!("__keyshift_backup_{table}")
}

/// Table listing the live snapshots.
pub const MANIFEST_TABLE: &str = "__keyshift_manifest";

/// Captured state of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSnapshot {
    /// Table name.
    pub table: String,
    /// Original CREATE TABLE statement.
    pub table_sql: String,
    /// Original CREATE INDEX statements.
    pub index_sql: Vec<String>,
    /// Row count at capture time.
    pub row_count: u64,
    /// AUTOINCREMENT counter at capture time, if any.
    pub sequence: Option<i64>,
}

/// Snapshots of every table touched by a migration.
#[derive(Debug, Clone, Default)]
pub struct Backup {
    snapshots: Vec<TableSnapshot>,
}

impl Backup {
    /// Create an empty backup.
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured snapshots, in capture order.
    pub fn snapshots(&self) -> &[TableSnapshot] {
        &self.snapshots
    }

    /// Whether nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Pre-migration row count per table.
    pub fn row_counts(&self) -> BTreeMap<String, u64> {
        self.snapshots
            .iter()
            .map(|s| (s.table.clone(), s.row_count))
            .collect()
    }

    /// Load the backup left behind by a run that did not finish, if any.
    pub async fn load(storage: &dyn Storage) -> Result<Option<Self>, Error> {
        if !table_exists(storage, MANIFEST_TABLE).await? {
            return Ok(None);
        }
        let rows = storage
            .get_all(
                &format!(
                    "SELECT table_name, table_sql, index_sql, row_count, sequence FROM {} ORDER BY position",
                    quote_ident(MANIFEST_TABLE)
                ),
                &[],
            )
            .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            let index_sql = serde_json::from_str(row.get_text(2)?)
                .map_err(|e| Error::InvalidData(format!("manifest index list: {e}")))?;
            snapshots.push(TableSnapshot {
                table: row.get_text(0)?.to_string(),
                table_sql: row.get_text(1)?.to_string(),
                index_sql,
                row_count: row.get_i64(3)? as u64,
                sequence: row.get(4)?.as_i64(),
            });
        }
        Ok(Some(Self { snapshots }))
    }

    /// Snapshot `table`.
    ///
    /// The backup table and its manifest entry are written in one
    /// transaction.
    pub async fn capture(&mut self, storage: &dyn Storage, table: &str) -> Result<(), Error> {
        storage.execute("BEGIN IMMEDIATE").await?;
        match self.capture_table(storage, table).await {
            Ok(snapshot) => {
                storage.execute("COMMIT").await?;
                tracing::debug!(table, row_count = snapshot.row_count, "table snapshot captured");
                self.snapshots.push(snapshot);
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = storage.execute("ROLLBACK").await {
                    tracing::error!(error = %rollback, "capture transaction rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn capture_table(&self, storage: &dyn Storage, table: &str) -> Result<TableSnapshot, Error> {
        let table_sql = storage
            .get_first(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                &[Value::from(table)],
            )
            .await?
            .ok_or_else(|| Error::InvalidData(format!("table {table} does not exist")))?
            .get_text(0)?
            .to_string();

        let index_sql = storage
            .get_all(
                "SELECT sql FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL",
                &[Value::from(table)],
            )
            .await?
            .iter()
            .map(|r| r.get_text(0).map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;

        let sequence = read_sequence(storage, table).await?;

        let backup = quote_ident(&backup_table_name(table));
        storage
            .execute(&format!(
                "DROP TABLE IF EXISTS {backup}; CREATE TABLE {backup} AS SELECT * FROM {};",
                quote_ident(table)
            ))
            .await?;
        let row_count = count_rows(storage, table).await?;

        let index_json = serde_json::to_string(&index_sql)
            .map_err(|e| Error::InvalidData(format!("manifest index list: {e}")))?;
        storage
            .execute(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    table_name TEXT PRIMARY KEY NOT NULL,
                    position INTEGER NOT NULL,
                    table_sql TEXT NOT NULL,
                    index_sql TEXT NOT NULL,
                    row_count INTEGER NOT NULL,
                    sequence INTEGER
                )",
                quote_ident(MANIFEST_TABLE)
            ))
            .await?;
        storage
            .run(
                &format!(
                    "INSERT OR REPLACE INTO {} (table_name, position, table_sql, index_sql, row_count, sequence)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    quote_ident(MANIFEST_TABLE)
                ),
                &[
                    Value::from(table),
                    Value::Integer(self.snapshots.len() as i64),
                    Value::from(table_sql.as_str()),
                    Value::from(index_json),
                    Value::Integer(row_count as i64),
                    sequence.map_or(Value::Null, Value::Integer),
                ],
            )
            .await?;

        Ok(TableSnapshot {
            table: table.to_string(),
            table_sql,
            index_sql,
            row_count,
            sequence,
        })
    }

    /// Put every captured table back as it was and drop the backup tables
    /// and the manifest.
    pub async fn restore(&self, storage: &dyn Storage) -> Result<(), Error> {
        storage.execute("BEGIN IMMEDIATE").await?;
        match self.restore_all(storage).await {
            Ok(()) => storage.execute("COMMIT").await,
            Err(e) => {
                if let Err(rollback) = storage.execute("ROLLBACK").await {
                    tracing::error!(error = %rollback, "restore transaction rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn restore_all(&self, storage: &dyn Storage) -> Result<(), Error> {
        for snapshot in &self.snapshots {
            let table = quote_ident(&snapshot.table);
            let backup = quote_ident(&backup_table_name(&snapshot.table));
            let stage = quote_ident(&staging_table_name(&snapshot.table));

            storage
                .execute(&format!(
                    "DROP TABLE IF EXISTS {table}; DROP TABLE IF EXISTS {stage}; {};",
                    snapshot.table_sql
                ))
                .await?;
            storage
                .execute(&format!("INSERT INTO {table} SELECT * FROM {backup}"))
                .await?;
            for index in &snapshot.index_sql {
                storage.execute(index).await?;
            }
            if let Some(seq) = snapshot.sequence {
                storage
                    .run(
                        "DELETE FROM sqlite_sequence WHERE name = ?1",
                        &[Value::from(snapshot.table.as_str())],
                    )
                    .await?;
                storage
                    .run(
                        "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
                        &[Value::from(snapshot.table.as_str()), Value::Integer(seq)],
                    )
                    .await?;
            }
            storage.execute(&format!("DROP TABLE {backup}")).await?;
            tracing::debug!(table = %snapshot.table, "table restored");
        }
        drop_manifest(storage).await
    }

    /// Drop the backup tables and the manifest, keeping the current data.
    pub async fn discard(&self, storage: &dyn Storage) -> Result<(), Error> {
        drop_manifest(storage).await?;
        for snapshot in &self.snapshots {
            storage
                .execute(&format!(
                    "DROP TABLE IF EXISTS {}",
                    quote_ident(&backup_table_name(&snapshot.table))
                ))
                .await?;
        }
        Ok(())
    }

    /// Keep the backup tables but drop the manifest, so later runs do not
    /// treat them as a pending recovery.
    pub async fn release(&self, storage: &dyn Storage) -> Result<(), Error> {
        drop_manifest(storage).await
    }
}

async fn drop_manifest(storage: &dyn Storage) -> Result<(), Error> {
    storage
        .execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(MANIFEST_TABLE)))
        .await
}

async fn table_exists(storage: &dyn Storage, table: &str) -> Result<bool, Error> {
    Ok(storage
        .get_first(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[Value::from(table)],
        )
        .await?
        .is_some())
}

async fn read_sequence(storage: &dyn Storage, table: &str) -> Result<Option<i64>, Error> {
    if !table_exists(storage, "sqlite_sequence").await? {
        return Ok(None);
    }
    storage
        .get_first(
            "SELECT seq FROM sqlite_sequence WHERE name = ?1",
            &[Value::from(table)],
        )
        .await?
        .map(|r| r.get_i64(0))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{column_type, SqliteStorage};

    async fn seeded() -> SqliteStorage {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .execute(
                "CREATE TABLE customers (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL);
                 CREATE INDEX idx_customers_name ON customers(name);",
            )
            .await
            .unwrap();
        for name in ["ada", "bo", "cy"] {
            storage
                .run("INSERT INTO customers (name) VALUES (?1)", &[Value::from(name)])
                .await
                .unwrap();
        }
        storage
            .execute("DELETE FROM customers WHERE name = 'cy'")
            .await
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn test_capture_records_counts_and_ddl() {
        let storage = seeded().await;
        let mut backup = Backup::new();
        backup.capture(&storage, "customers").await.unwrap();

        let snapshot = &backup.snapshots()[0];
        assert_eq!(snapshot.row_count, 2);
        assert_eq!(snapshot.sequence, Some(3));
        assert!(snapshot.table_sql.contains("AUTOINCREMENT"));
        assert_eq!(snapshot.index_sql.len(), 1);
        assert_eq!(backup.row_counts().get("customers"), Some(&2));
        assert_eq!(count_rows(&storage, "__keyshift_backup_customers").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_restore_after_rebuild() {
        let storage = seeded().await;
        let mut backup = Backup::new();
        backup.capture(&storage, "customers").await.unwrap();

        storage
            .execute(
                "DROP TABLE customers;
                 CREATE TABLE customers (id TEXT PRIMARY KEY NOT NULL, name TEXT NOT NULL);
                 INSERT INTO customers VALUES ('x', 'ada');",
            )
            .await
            .unwrap();

        backup.restore(&storage).await.unwrap();

        assert_eq!(
            column_type(&storage, "customers", "id").await.unwrap().as_deref(),
            Some("INTEGER")
        );
        assert_eq!(count_rows(&storage, "customers").await.unwrap(), 2);
        let index = storage
            .get_first(
                "SELECT name FROM sqlite_master WHERE type = 'index' AND name = 'idx_customers_name'",
                &[],
            )
            .await
            .unwrap();
        assert!(index.is_some());
        assert!(column_type(&storage, "__keyshift_backup_customers", "id")
            .await
            .unwrap()
            .is_none());

        // counter survives: next id continues after the deleted row
        let result = storage
            .run("INSERT INTO customers (name) VALUES ('dee')", &[])
            .await
            .unwrap();
        assert_eq!(result.last_insert_id, 4);
    }

    #[tokio::test]
    async fn test_capture_missing_table_fails() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let mut backup = Backup::new();
        assert!(backup.capture(&storage, "nope").await.is_err());
        assert!(backup.is_empty());
    }

    #[tokio::test]
    async fn test_discard_keeps_data() {
        let storage = seeded().await;
        let mut backup = Backup::new();
        backup.capture(&storage, "customers").await.unwrap();
        backup.discard(&storage).await.unwrap();

        assert_eq!(count_rows(&storage, "customers").await.unwrap(), 2);
        assert!(count_rows(&storage, "__keyshift_backup_customers").await.is_err());
        assert!(Backup::load(&storage).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_manifest_survives_the_process() {
        let storage = seeded().await;
        storage
            .execute("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)")
            .await
            .unwrap();
        assert!(Backup::load(&storage).await.unwrap().is_none());

        let mut backup = Backup::new();
        backup.capture(&storage, "customers").await.unwrap();
        backup.capture(&storage, "notes").await.unwrap();

        let loaded = Backup::load(&storage).await.unwrap().unwrap();
        assert_eq!(loaded.snapshots(), backup.snapshots());
        assert_eq!(loaded.snapshots()[0].table, "customers");
        assert_eq!(loaded.snapshots()[1].sequence, None);
    }

    #[tokio::test]
    async fn test_loaded_backup_restores_and_clears_manifest() {
        let storage = seeded().await;
        Backup::new().capture(&storage, "customers").await.unwrap();
        storage.execute("DELETE FROM customers").await.unwrap();

        let loaded = Backup::load(&storage).await.unwrap().unwrap();
        loaded.restore(&storage).await.unwrap();

        assert_eq!(count_rows(&storage, "customers").await.unwrap(), 2);
        assert!(Backup::load(&storage).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_keeps_backup_tables() {
        let storage = seeded().await;
        let mut backup = Backup::new();
        backup.capture(&storage, "customers").await.unwrap();
        backup.release(&storage).await.unwrap();

        assert_eq!(count_rows(&storage, "__keyshift_backup_customers").await.unwrap(), 2);
        assert!(Backup::load(&storage).await.unwrap().is_none());
    }
}
