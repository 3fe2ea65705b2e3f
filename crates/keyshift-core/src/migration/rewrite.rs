//! Foreign-key rewriting using id mappings.

use super::error::MigrationError;
use super::keygen::is_valid;
use super::table::IdMappings;
use crate::schema::{ColumnDef, TableDef};
use crate::storage::{quote_ident, Storage, Value};

/// Result of rewriting one dependent table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteOutcome {
    /// Values replaced with their new identifier.
    pub rewritten: u64,
    /// Orphaned values set to NULL.
    pub nulled: u64,
    /// One warning per orphaned value.
    pub warnings: Vec<String>,
}

/// Rewrites foreign-key columns of a dependent table in place.
pub struct ReferenceRewriter<'a> {
    storage: &'a dyn Storage,
    batch_size: usize,
}

impl<'a> ReferenceRewriter<'a> {
    /// Create a rewriter.
    pub fn new(storage: &'a dyn Storage, batch_size: usize) -> Self {
        Self {
            storage,
            batch_size: batch_size.max(1),
        }
    }

    /// Rewrite `columns` of `table` using the mappings of the tables they reference.
    ///
    /// Every referenced table must already have a mapping. Values missing
    /// from the mapping are set to NULL and reported as warnings; values that
    /// are already identifiers are left alone. All columns are rewritten in a
    /// single transaction.
    pub async fn rewrite(
        &self,
        table: &TableDef,
        columns: &[&ColumnDef],
        mappings: &IdMappings,
    ) -> Result<RewriteOutcome, MigrationError> {
        for column in columns {
            let references = column.references.as_deref().unwrap_or_default();
            if !mappings.contains_key(references) {
                return Err(MigrationError::MissingMapping {
                    table: table.name.clone(),
                    references: references.to_string(),
                });
            }
        }

        self.storage.execute("BEGIN IMMEDIATE").await?;
        let mut outcome = RewriteOutcome::default();
        for column in columns {
            if let Err(e) = self.rewrite_column(table, column, mappings, &mut outcome).await {
                if let Err(rollback) = self.storage.execute("ROLLBACK").await {
                    tracing::error!(table = %table.name, error = %rollback, "transaction rollback failed");
                }
                return Err(e);
            }
        }
        self.storage.execute("COMMIT").await?;

        tracing::info!(
            table = %table.name,
            rewritten = outcome.rewritten,
            nulled = outcome.nulled,
            "foreign keys rewritten"
        );
        Ok(outcome)
    }

    async fn rewrite_column(
        &self,
        table: &TableDef,
        column: &ColumnDef,
        mappings: &IdMappings,
        outcome: &mut RewriteOutcome,
    ) -> Result<(), MigrationError> {
        let references = column.references.as_deref().unwrap_or_default();
        let Some(mapping) = mappings.get(references) else {
            return Err(MigrationError::MissingMapping {
                table: table.name.clone(),
                references: references.to_string(),
            });
        };
        let failed = |reason: String| MigrationError::RewriteFailed {
            table: table.name.clone(),
            column: column.name.clone(),
            reason,
        };

        let name = quote_ident(&table.name);
        let col = quote_ident(&column.name);
        let select_sql = format!(
            "SELECT rowid, {col} FROM {name} WHERE rowid > ?1 AND {col} IS NOT NULL ORDER BY rowid LIMIT ?2"
        );
        let update_sql = format!("UPDATE {name} SET {col} = ?1 WHERE rowid = ?2");

        let mut last_rowid = i64::MIN;
        loop {
            let rows = self
                .storage
                .get_all(
                    &select_sql,
                    &[Value::Integer(last_rowid), Value::Integer(self.batch_size as i64)],
                )
                .await
                .map_err(|e| failed(e.to_string()))?;
            let page_len = rows.len();

            for row in rows {
                let rowid = row.get_i64(0).map_err(|e| failed(e.to_string()))?;
                last_rowid = rowid;
                let value = row.get(1).map_err(|e| failed(e.to_string()))?;

                let replacement = match value {
                    Value::Integer(old) => mapping.get(*old).map(str::to_string),
                    Value::Text(s) if is_valid(s) => continue,
                    _ => None,
                };

                let new_value = match replacement {
                    Some(new_id) => {
                        outcome.rewritten += 1;
                        Value::Text(new_id)
                    }
                    None => {
                        outcome.nulled += 1;
                        let warning = format!(
                            "{}.{}: row {rowid} references missing {references} id {value}; set to NULL",
                            table.name, column.name
                        );
                        tracing::warn!("{warning}");
                        outcome.warnings.push(warning);
                        Value::Null
                    }
                };

                self.storage
                    .run(&update_sql, &[new_value, Value::Integer(rowid)])
                    .await
                    .map_err(|e| failed(e.to_string()))?;
            }

            if page_len < self.batch_size {
                break;
            }
        }
        Ok(())
    }
}
