//! Post-migration validation battery.
//!
//! Four independent categories run against the migrated store. A storage
//! error inside one category fails that category only; the report is always
//! fully populated.

use super::error::VALIDATION_FAILED_PREFIX;
use super::keygen::{is_valid, NIL_IDENTIFIER};
use super::report::{CategoryResult, ValidationCategory, ValidationReport};
use crate::error::Error;
use crate::schema::{Schema, TableDef, ID_COLUMN};
use crate::storage::{count_rows, quote_ident, Storage, Value};
use std::collections::BTreeMap;

/// Duplicate ids listed per table before the rest are summarised.
const MAX_DUPLICATES_LISTED: i64 = 10;

/// Runs the validation battery over a schema.
pub struct Validator<'a> {
    storage: &'a dyn Storage,
    schema: &'a Schema,
    batch_size: usize,
}

impl<'a> Validator<'a> {
    /// Create a validator.
    pub fn new(storage: &'a dyn Storage, schema: &'a Schema, batch_size: usize) -> Self {
        Self {
            storage,
            schema,
            batch_size: batch_size.max(1),
        }
    }

    /// Run every category.
    ///
    /// `expected_counts` holds pre-migration row counts per table. Without
    /// it the record-count category has no baseline and passes.
    pub async fn validate(&self, expected_counts: Option<&BTreeMap<String, u64>>) -> ValidationReport {
        let mut results = BTreeMap::new();
        for category in ValidationCategory::ALL {
            let outcome = match category {
                ValidationCategory::UuidFormat => self.check_uuid_format().await,
                ValidationCategory::ForeignKeys => self.check_foreign_keys().await,
                ValidationCategory::RecordCounts => self.check_record_counts(expected_counts).await,
                ValidationCategory::DataIntegrity => self.check_data_integrity().await,
            };
            let result = outcome.unwrap_or_else(|e| {
                tracing::error!(%category, error = %e, "validation check errored");
                CategoryResult::from_errors(vec![format!("{VALIDATION_FAILED_PREFIX}{e}")])
            });
            if !result.passed {
                tracing::warn!(%category, errors = result.errors.len(), "validation category failed");
            }
            results.insert(category, result);
        }

        let report = ValidationReport::from_results(results);
        tracing::info!(
            success = report.success,
            passed = report.passed_validations,
            total = report.total_validations,
            "validation finished"
        );
        report
    }

    /// Every id and non-null foreign key must be a valid identifier.
    ///
    /// The scan is exhaustive, paged by rowid.
    async fn check_uuid_format(&self) -> Result<CategoryResult, Error> {
        let mut errors = Vec::new();
        for table in &self.schema.tables {
            errors.extend(self.scan_table_format(table).await?);
        }
        Ok(CategoryResult::from_errors(errors))
    }

    async fn scan_table_format(&self, table: &TableDef) -> Result<Vec<String>, Error> {
        let key_columns: Vec<&str> = std::iter::once(ID_COLUMN)
            .chain(table.foreign_keys().map(|c| c.name.as_str()))
            .collect();
        let select_sql = format!(
            "SELECT rowid, {} FROM {} WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
            key_columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            quote_ident(&table.name)
        );

        // (count, first offending value) per column
        let mut malformed: Vec<(u64, Option<String>)> = vec![(0, None); key_columns.len()];
        let mut last_rowid = i64::MIN;
        loop {
            let rows = self
                .storage
                .get_all(
                    &select_sql,
                    &[Value::Integer(last_rowid), Value::Integer(self.batch_size as i64)],
                )
                .await?;
            let page_len = rows.len();
            for row in rows {
                last_rowid = row.get_i64(0)?;
                for (idx, slot) in malformed.iter_mut().enumerate() {
                    let ok = match row.get(idx + 1)? {
                        Value::Null => true,
                        Value::Text(s) => is_valid(s),
                        _ => false,
                    };
                    if !ok {
                        slot.0 += 1;
                        slot.1.get_or_insert_with(|| {
                            row.get(idx + 1).map(ToString::to_string).unwrap_or_default()
                        });
                    }
                }
            }
            if page_len < self.batch_size {
                break;
            }
        }

        Ok(key_columns
            .iter()
            .zip(malformed)
            .filter(|(_, (count, _))| *count > 0)
            .map(|(column, (count, sample))| {
                format!(
                    "{}.{column}: {count} malformed identifier(s), e.g. {}",
                    table.name,
                    sample.unwrap_or_default()
                )
            })
            .collect())
    }

    /// No non-null foreign key may point at a missing parent.
    async fn check_foreign_keys(&self) -> Result<CategoryResult, Error> {
        let mut errors = Vec::new();
        for fk in self.schema.foreign_keys() {
            let sql = format!(
                "SELECT COUNT(*) FROM {child} c WHERE c.{col} IS NOT NULL \
                 AND NOT EXISTS (SELECT 1 FROM {parent} p WHERE p.{id} = c.{col})",
                child = quote_ident(&fk.table),
                col = quote_ident(&fk.column),
                parent = quote_ident(&fk.references),
                id = quote_ident(ID_COLUMN),
            );
            let orphans = self
                .storage
                .get_first(&sql, &[])
                .await?
                .map(|r| r.get_i64(0))
                .transpose()?
                .unwrap_or(0);
            if orphans > 0 {
                errors.push(format!("{fk}: {orphans} orphaned records"));
            }
        }
        Ok(CategoryResult::from_errors(errors))
    }

    /// Row counts must match the pre-migration baseline.
    async fn check_record_counts(
        &self,
        expected: Option<&BTreeMap<String, u64>>,
    ) -> Result<CategoryResult, Error> {
        let Some(expected) = expected else {
            return Ok(CategoryResult::from_errors(Vec::new()));
        };
        let mut errors = Vec::new();
        for table in &self.schema.tables {
            let Some(&before) = expected.get(&table.name) else {
                continue;
            };
            let after = count_rows(self.storage, &table.name).await?;
            if before != after {
                errors.push(format!(
                    "{}: expected {before} records, found {after}",
                    table.name
                ));
            }
        }
        Ok(CategoryResult::from_errors(errors))
    }

    /// No duplicate ids, and no nil or empty ids.
    async fn check_data_integrity(&self) -> Result<CategoryResult, Error> {
        let mut errors = Vec::new();
        let id = quote_ident(ID_COLUMN);
        for table in &self.schema.tables {
            let name = quote_ident(&table.name);

            let duplicates_sql = format!(
                "SELECT {id}, COUNT(*) FROM {name} WHERE {id} IS NOT NULL \
                 GROUP BY {id} HAVING COUNT(*) > 1 ORDER BY {id} LIMIT ?1"
            );
            let duplicates = self
                .storage
                .get_all(&duplicates_sql, &[Value::Integer(MAX_DUPLICATES_LISTED)])
                .await?;
            for row in duplicates {
                errors.push(format!(
                    "{}: duplicate identifier {} ({} rows)",
                    table.name,
                    row.get(0)?,
                    row.get_i64(1)?
                ));
            }

            let nil_sql = format!(
                "SELECT COUNT(*) FROM {name} WHERE {id} IS NULL OR TRIM({id}) = '' OR {id} = ?1"
            );
            let nil = self
                .storage
                .get_first(&nil_sql, &[Value::from(NIL_IDENTIFIER)])
                .await?
                .map(|r| r.get_i64(0))
                .transpose()?
                .unwrap_or(0);
            if nil > 0 {
                errors.push(format!("{}: {nil} nil or empty identifier(s)", table.name));
            }
        }
        Ok(CategoryResult::from_errors(errors))
    }
}
