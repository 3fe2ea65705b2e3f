//! Structured results returned to the host.

use super::state::{MigrationStatus, TableProgress};
use serde::Serialize;
use std::collections::BTreeMap;

/// A validation check category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationCategory {
    /// Every key value is a well-formed identifier.
    UuidFormat,
    /// No foreign key points at a missing parent.
    ForeignKeys,
    /// Row counts are unchanged.
    RecordCounts,
    /// No duplicate or nil primary keys.
    DataIntegrity,
}

impl ValidationCategory {
    /// All categories in the order they run.
    pub const ALL: [ValidationCategory; 4] = [
        ValidationCategory::UuidFormat,
        ValidationCategory::ForeignKeys,
        ValidationCategory::RecordCounts,
        ValidationCategory::DataIntegrity,
    ];
}

impl std::fmt::Display for ValidationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationCategory::UuidFormat => write!(f, "uuidFormat"),
            ValidationCategory::ForeignKeys => write!(f, "foreignKeys"),
            ValidationCategory::RecordCounts => write!(f, "recordCounts"),
            ValidationCategory::DataIntegrity => write!(f, "dataIntegrity"),
        }
    }
}

/// Outcome of one validation category.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CategoryResult {
    /// Whether the category passed.
    pub passed: bool,
    /// Why it did not.
    pub errors: Vec<String>,
}

impl CategoryResult {
    /// Build from collected errors; passes when there are none.
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            passed: errors.is_empty(),
            errors,
        }
    }
}

/// Aggregated validation outcome.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// All categories passed.
    pub success: bool,
    /// Per-category results.
    pub validation_results: BTreeMap<ValidationCategory, CategoryResult>,
    /// Number of categories run.
    pub total_validations: usize,
    /// Number of categories that passed.
    pub passed_validations: usize,
}

impl ValidationReport {
    /// Aggregate category results.
    pub fn from_results(validation_results: BTreeMap<ValidationCategory, CategoryResult>) -> Self {
        let total_validations = validation_results.len();
        let passed_validations = validation_results.values().filter(|r| r.passed).count();
        Self {
            success: passed_validations == total_validations,
            validation_results,
            total_validations,
            passed_validations,
        }
    }

    /// Result for one category.
    pub fn category(&self, category: ValidationCategory) -> Option<&CategoryResult> {
        self.validation_results.get(&category)
    }

    /// One-line summary of failing categories, e.g. `foreignKeys: a; b`.
    pub fn failure_summary(&self) -> String {
        self.validation_results
            .iter()
            .filter(|(_, r)| !r.passed)
            .map(|(category, r)| format!("{category}: {}", r.errors.join("; ")))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// The result of a migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// Whether the store ends up fully migrated.
    pub success: bool,
    /// Terminal state of the run.
    pub status: MigrationStatus,
    /// Tables processed, in migration order.
    pub tables_processed: Vec<String>,
    /// Rows migrated per table.
    pub records_migrated: BTreeMap<String, u64>,
    /// Non-fatal observations.
    pub warnings: Vec<String>,
    /// Failures.
    pub errors: Vec<String>,
    /// Validation outcome, when validation ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_report: Option<ValidationReport>,
    /// Per-table progress, in migration order. Empty when no table was
    /// touched.
    pub tables: Vec<TableProgress>,
}

impl MigrationReport {
    /// Create an empty, unsuccessful report.
    pub fn new() -> Self {
        Self {
            success: false,
            status: MigrationStatus::NotStarted,
            tables_processed: Vec::new(),
            records_migrated: BTreeMap::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            validation_report: None,
            tables: Vec::new(),
        }
    }

    /// Total rows migrated across tables.
    pub fn total_records(&self) -> u64 {
        self.records_migrated.values().sum()
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for MigrationReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_report_aggregation() {
        let mut results = BTreeMap::new();
        results.insert(ValidationCategory::UuidFormat, CategoryResult::from_errors(vec![]));
        results.insert(
            ValidationCategory::ForeignKeys,
            CategoryResult::from_errors(vec!["products.category_id -> categories.id: 1 orphaned records".into()]),
        );

        let report = ValidationReport::from_results(results);
        assert!(!report.success);
        assert_eq!(report.total_validations, 2);
        assert_eq!(report.passed_validations, 1);
        assert_eq!(
            report.failure_summary(),
            "foreignKeys: products.category_id -> categories.id: 1 orphaned records"
        );
    }

    #[test]
    fn test_report_json_uses_camel_case() {
        let mut report = MigrationReport::new();
        report.records_migrated.insert("categories".into(), 3);
        report.tables_processed.push("categories".into());

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["tablesProcessed"][0], "categories");
        assert_eq!(json["recordsMigrated"]["categories"], 3);
        assert_eq!(json["status"], "not_started");
        assert!(json.get("validationReport").is_none());
        assert_eq!(json["tables"], serde_json::json!([]));
    }

    #[test]
    fn test_category_keys_serialize_camel_case() {
        let mut results = BTreeMap::new();
        for category in ValidationCategory::ALL {
            results.insert(category, CategoryResult::from_errors(vec![]));
        }
        let json = serde_json::to_value(ValidationReport::from_results(results)).unwrap();
        assert_eq!(json["validationResults"]["dataIntegrity"]["passed"], true);
        assert_eq!(json["totalValidations"], 4);
        assert_eq!(json["passedValidations"], 4);
    }
}
