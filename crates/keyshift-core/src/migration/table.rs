//! Per-table migration from integer keys to identifiers.
//!
//! A table is rebuilt inside one transaction: rows are copied page by page
//! into a staging table with the identifier layout, then the staging table
//! replaces the legacy one. Either the whole table is swapped or nothing is.

use super::error::MigrationError;
use super::keygen::KeyGenerator;
use crate::error::Error;
use crate::schema::{TableDef, ID_COLUMN};
use crate::storage::{column_type, quote_ident, table_columns, Row, Storage, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Default number of rows fetched per page.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Staging table name for `table`.
pub fn staging_table_name(table: &str) -> String {
    format!("__keyshift_stage_{table}")
}

/// Legacy integer id to new identifier, for one table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdMapping {
    entries: HashMap<i64, String>,
}

impl IdMapping {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mapping.
    pub fn insert(&mut self, old_id: i64, new_id: impl Into<String>) {
        self.entries.insert(old_id, new_id.into());
    }

    /// Identifier for a legacy id.
    pub fn get(&self, old_id: i64) -> Option<&str> {
        self.entries.get(&old_id).map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by legacy id.
    pub fn sorted(&self) -> BTreeMap<i64, &str> {
        self.entries.iter().map(|(k, v)| (*k, v.as_str())).collect()
    }
}

/// Mappings for every table migrated so far, by table name.
pub type IdMappings = HashMap<String, IdMapping>;

/// A row bound to its table's declared layout.
#[derive(Debug, Clone)]
pub struct Record<'a> {
    table: &'a TableDef,
    values: Vec<Value>,
}

impl<'a> Record<'a> {
    /// Bind a row selected with [`TableDef::select_list`].
    pub fn from_row(table: &'a TableDef, row: Row) -> Result<Self, MigrationError> {
        let expected = table.columns.len() + 1;
        if row.len() != expected {
            return Err(MigrationError::SchemaMismatch {
                table: table.name.clone(),
                message: format!("expected {expected} columns, row has {}", row.len()),
            });
        }
        Ok(Self {
            table,
            values: row.into_values(),
        })
    }

    /// The legacy integer primary key.
    pub fn legacy_id(&self) -> Result<i64, MigrationError> {
        self.values[0]
            .as_i64()
            .ok_or_else(|| MigrationError::SchemaMismatch {
                table: self.table.name.clone(),
                message: format!("non-integer primary key {}", self.values[0]),
            })
    }

    /// Row values with the primary key replaced by `new_id`.
    pub fn into_values_with_id(mut self, new_id: &str) -> Vec<Value> {
        self.values[0] = Value::Text(new_id.to_string());
        self.values
    }
}

/// Result of migrating one table.
#[derive(Debug, Clone)]
pub struct MigratedTable {
    /// Rows migrated.
    pub migrated_count: u64,
    /// Legacy id to identifier.
    pub mapping: IdMapping,
}

/// Migrates a single table to identifier keys.
pub struct TableMigrator<'a> {
    storage: &'a dyn Storage,
    keygen: &'a dyn KeyGenerator,
    batch_size: usize,
}

impl<'a> TableMigrator<'a> {
    /// Create a migrator.
    pub fn new(storage: &'a dyn Storage, keygen: &'a dyn KeyGenerator, batch_size: usize) -> Self {
        Self {
            storage,
            keygen,
            batch_size: batch_size.max(1),
        }
    }

    /// Migrate `table`.
    ///
    /// Returns [`MigrationError::AlreadyMigrated`] without touching the table
    /// if its `id` column is already text. Any write failure rolls back the
    /// table's transaction and is returned as [`MigrationError::WriteFailed`].
    pub async fn migrate(&self, table: &TableDef) -> Result<MigratedTable, MigrationError> {
        match column_type(self.storage, &table.name, ID_COLUMN).await? {
            None => {
                return Err(MigrationError::SchemaMismatch {
                    table: table.name.clone(),
                    message: "table or id column not found".to_string(),
                })
            }
            Some(t) if t == "TEXT" => {
                return Err(MigrationError::AlreadyMigrated {
                    table: table.name.clone(),
                })
            }
            Some(_) => {}
        }
        self.check_columns(table).await?;

        self.storage
            .execute("BEGIN IMMEDIATE")
            .await
            .map_err(|e| write_failed(table, e))?;

        let result = match self.rebuild(table).await {
            Ok(migrated) => self
                .storage
                .execute("COMMIT")
                .await
                .map(|_| migrated)
                .map_err(|e| write_failed(table, e)),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            tracing::warn!(table = %table.name, error = %e, "table migration failed, rolling back");
            if let Err(rollback) = self.storage.execute("ROLLBACK").await {
                tracing::error!(table = %table.name, error = %rollback, "transaction rollback failed");
            }
        }
        result
    }

    /// Compare live columns against the declared layout.
    async fn check_columns(&self, table: &TableDef) -> Result<(), MigrationError> {
        let live = table_columns(self.storage, &table.name).await?;
        let live: HashSet<&str> = live.iter().map(String::as_str).collect();
        let declared: HashSet<&str> = table.column_names().into_iter().collect();

        let mut missing: Vec<_> = declared.difference(&live).copied().collect();
        let mut unexpected: Vec<_> = live.difference(&declared).copied().collect();
        if missing.is_empty() && unexpected.is_empty() {
            return Ok(());
        }
        missing.sort_unstable();
        unexpected.sort_unstable();
        Err(MigrationError::SchemaMismatch {
            table: table.name.clone(),
            message: format!("missing columns {missing:?}, unexpected columns {unexpected:?}"),
        })
    }

    async fn rebuild(&self, table: &TableDef) -> Result<MigratedTable, MigrationError> {
        let stage = staging_table_name(&table.name);
        let columns = table.select_list();
        let placeholders = (1..=table.columns.len() + 1)
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let select_sql = format!(
            "SELECT {columns} FROM {} WHERE {id} > ?1 ORDER BY {id} LIMIT ?2",
            quote_ident(&table.name),
            id = quote_ident(ID_COLUMN),
        );
        let insert_sql = format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders})",
            quote_ident(&stage)
        );

        let ddl = format!(
            "DROP TABLE IF EXISTS {}; {};",
            quote_ident(&stage),
            table.uuid_ddl(&stage)
        );
        self.storage
            .execute(&ddl)
            .await
            .map_err(|e| write_failed(table, e))?;

        let mut mapping = IdMapping::new();
        let mut issued = HashSet::new();
        let mut last_id = i64::MIN;
        loop {
            let rows = self
                .storage
                .get_all(
                    &select_sql,
                    &[Value::Integer(last_id), Value::Integer(self.batch_size as i64)],
                )
                .await
                .map_err(|e| write_failed(table, e))?;
            let page_len = rows.len();

            for row in rows {
                let record = Record::from_row(table, row)?;
                let old_id = record.legacy_id()?;
                let new_id = self.keygen.generate();
                if !issued.insert(new_id.clone()) {
                    return Err(MigrationError::DuplicateIdentifier {
                        table: table.name.clone(),
                        identifier: new_id,
                    });
                }
                self.storage
                    .run(&insert_sql, &record.into_values_with_id(&new_id))
                    .await
                    .map_err(|e| write_failed(table, e))?;
                mapping.insert(old_id, new_id);
                last_id = old_id;
            }

            tracing::debug!(table = %table.name, page_len, total = mapping.len(), "copied page");
            if page_len < self.batch_size {
                break;
            }
        }

        let mut swap = format!(
            "DROP TABLE {table}; ALTER TABLE {} RENAME TO {table};",
            quote_ident(&stage),
            table = quote_ident(&table.name),
        );
        for index in table.foreign_key_indexes() {
            swap.push_str(&index);
            swap.push(';');
        }
        self.storage
            .execute(&swap)
            .await
            .map_err(|e| write_failed(table, e))?;

        tracing::info!(table = %table.name, migrated = mapping.len(), "table migrated");
        Ok(MigratedTable {
            migrated_count: mapping.len() as u64,
            mapping,
        })
    }
}

fn write_failed(table: &TableDef, error: Error) -> MigrationError {
    MigrationError::WriteFailed {
        table: table.name.clone(),
        reason: error.to_string(),
    }
}
