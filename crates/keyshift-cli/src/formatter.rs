//! Output formatters for command results.

use clap::ValueEnum;
use comfy_table::{Cell, Color, Table};
use keyshift_core::migration::{MigrationReport, TableStatus, ValidationReport};
use serde::Serialize;
use std::collections::BTreeMap;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Key type and size of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub table: String,
    /// Declared type of the id column, if the table exists.
    pub id_type: Option<String>,
    pub rows: Option<u64>,
}

/// Result of `keyshift status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub migrated: bool,
    pub tables: Vec<TableSummary>,
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format a migration report.
    fn format_migration_report(&self, report: &MigrationReport) -> String;

    /// Format a validation report.
    fn format_validation_report(&self, report: &ValidationReport) -> String;

    /// Format migration status.
    fn format_status(&self, status: &StatusSummary) -> String;

    /// Format rows inserted per table.
    fn format_seed(&self, counts: &BTreeMap<String, u64>) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_migration_report(&self, report: &MigrationReport) -> String {
        let mut output = format!(
            "Migration {} ({})\n",
            if report.success { "succeeded" } else { "failed" },
            report.status
        );

        if !report.tables.is_empty() {
            let mut table = Table::new();
            table.set_header(vec!["Table", "Status", "Records", "Error"]);
            for progress in &report.tables {
                let status = match progress.status {
                    TableStatus::Complete => Cell::new(progress.status).fg(Color::Green),
                    TableStatus::Failed => Cell::new(progress.status).fg(Color::Red),
                    _ => Cell::new(progress.status),
                };
                table.add_row(vec![
                    Cell::new(&progress.table),
                    status,
                    Cell::new(progress.migrated_count),
                    Cell::new(progress.error.as_deref().unwrap_or_default()),
                ]);
            }
            table.add_row(vec![
                Cell::new("total"),
                Cell::new(""),
                Cell::new(report.total_records()),
                Cell::new(""),
            ]);
            output.push_str(&table.to_string());
            output.push('\n');
        }

        if let Some(validation) = &report.validation_report {
            output.push_str(&self.format_validation_report(validation));
            output.push('\n');
        }
        for warning in &report.warnings {
            output.push_str(&format!("warning: {warning}\n"));
        }
        for error in &report.errors {
            output.push_str(&format!("error: {error}\n"));
        }
        output.trim_end().to_string()
    }

    fn format_validation_report(&self, report: &ValidationReport) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Check", "Result", "Details"]);
        for (category, result) in &report.validation_results {
            let verdict = if result.passed {
                Cell::new("pass").fg(Color::Green)
            } else {
                Cell::new("FAIL").fg(Color::Red)
            };
            table.add_row(vec![
                Cell::new(category),
                verdict,
                Cell::new(result.errors.join("\n")),
            ]);
        }
        format!(
            "{table}\n{}/{} checks passed",
            report.passed_validations, report.total_validations
        )
    }

    fn format_status(&self, status: &StatusSummary) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Table", "Id type", "Rows"]);
        for summary in &status.tables {
            table.add_row(vec![
                Cell::new(&summary.table),
                Cell::new(summary.id_type.as_deref().unwrap_or("missing")),
                Cell::new(summary.rows.map(|n| n.to_string()).unwrap_or_default()),
            ]);
        }
        let state = if status.migrated { "migrated" } else { "not migrated" };
        format!("{table}\nDatabase is {state}")
    }

    fn format_seed(&self, counts: &BTreeMap<String, u64>) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Table", "Rows inserted"]);
        for (name, count) in counts {
            table.add_row(vec![Cell::new(name), Cell::new(count)]);
        }
        table.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl JsonFormatter {
    fn to_json<T: Serialize>(value: &T) -> String {
        serde_json::to_string_pretty(value)
            .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
    }
}

impl Formatter for JsonFormatter {
    fn format_migration_report(&self, report: &MigrationReport) -> String {
        Self::to_json(report)
    }

    fn format_validation_report(&self, report: &ValidationReport) -> String {
        Self::to_json(report)
    }

    fn format_status(&self, status: &StatusSummary) -> String {
        Self::to_json(status)
    }

    fn format_seed(&self, counts: &BTreeMap<String, u64>) -> String {
        Self::to_json(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyshift_core::migration::{MigrationStatus, TableProgress};

    fn progress(table: &str, migrated: u64) -> TableProgress {
        let mut progress = TableProgress::new(table);
        progress.start();
        progress.complete(migrated);
        progress
    }

    fn report() -> MigrationReport {
        let mut report = MigrationReport::new();
        report.success = true;
        report.status = MigrationStatus::Complete;
        report.tables_processed = vec!["categories".into(), "products".into()];
        report.records_migrated.insert("categories".into(), 2);
        report.records_migrated.insert("products".into(), 5);
        report.warnings.push("products.supplier_id: row 3 references missing suppliers id 9; set to NULL".into());
        report.tables = vec![progress("categories", 2), progress("products", 5)];
        report
    }

    #[test]
    fn test_table_migration_report() {
        let output = TableFormatter.format_migration_report(&report());
        assert!(output.starts_with("Migration succeeded (complete)"));
        assert!(output.contains("products"));
        assert!(output.contains("warning: products.supplier_id"));
        assert!(output.contains("complete"));
    }

    #[test]
    fn test_table_report_shows_failed_table() {
        let mut report = report();
        report.success = false;
        report.status = MigrationStatus::Failed;
        report.tables[1] = TableProgress::new("products");
        report.tables[1].start();
        report.tables[1].fail("write failed for products: disk I/O error");
        report.tables.push(TableProgress::new("sales"));

        let output = TableFormatter.format_migration_report(&report);
        assert!(output.starts_with("Migration failed (failed)"));
        assert!(output.contains("write failed for products: disk I/O error"));
        assert!(output.contains("pending"));
    }

    #[test]
    fn test_json_migration_report() {
        let output = JsonFormatter.format_migration_report(&report());
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["status"], "complete");
        assert_eq!(json["recordsMigrated"]["products"], 5);
        assert_eq!(json["tables"][1]["status"], "complete");
        assert_eq!(json["tables"][1]["migratedCount"], 5);
        assert!(json.get("validationReport").is_none());
    }

    #[test]
    fn test_status() {
        let status = StatusSummary {
            migrated: false,
            tables: vec![
                TableSummary {
                    table: "categories".into(),
                    id_type: Some("INTEGER".into()),
                    rows: Some(3),
                },
                TableSummary {
                    table: "bulk_pricing".into(),
                    id_type: None,
                    rows: None,
                },
            ],
        };
        let output = TableFormatter.format_status(&status);
        assert!(output.contains("missing"));
        assert!(output.ends_with("Database is not migrated"));

        let json: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_status(&status)).unwrap();
        assert_eq!(json["tables"][0]["idType"], "INTEGER");
        assert!(json["tables"][1]["rows"].is_null());
    }
}
