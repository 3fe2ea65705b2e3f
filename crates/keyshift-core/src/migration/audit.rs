//! Audit map of legacy ids to identifiers.
//!
//! Written once after a successful run, before the in-memory mappings are
//! dropped.

use super::error::MigrationError;
use super::table::IdMappings;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize)]
struct AuditMapEntry<'a> {
    old_id: i64,
    new_id: &'a str,
}

#[derive(Debug, Serialize)]
struct AuditMap<'a> {
    generated_at: String,
    total_entries: usize,
    tables: BTreeMap<&'a str, Vec<AuditMapEntry<'a>>>,
}

/// Write `mappings` as pretty JSON to `path`, creating parent directories.
///
/// Returns the number of entries written.
pub fn write_audit_map(path: &Path, mappings: &IdMappings) -> Result<usize, MigrationError> {
    let tables: BTreeMap<&str, Vec<AuditMapEntry<'_>>> = mappings
        .iter()
        .map(|(table, mapping)| {
            let entries = mapping
                .sorted()
                .into_iter()
                .map(|(old_id, new_id)| AuditMapEntry { old_id, new_id })
                .collect();
            (table.as_str(), entries)
        })
        .collect();
    let total_entries = tables.values().map(Vec::len).sum();

    let payload = AuditMap {
        generated_at: Utc::now().to_rfc3339(),
        total_entries,
        tables,
    };
    let json = serde_json::to_string_pretty(&payload)
        .map_err(|e| MigrationError::Serialization(e.to_string()))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, json)?;
    tracing::info!(path = %path.display(), total_entries, "audit map written");
    Ok(total_entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::table::IdMapping;

    #[test]
    fn test_write_audit_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("id-map.json");

        let mut categories = IdMapping::new();
        categories.insert(2, "b");
        categories.insert(1, "a");
        let mut mappings = IdMappings::new();
        mappings.insert("categories".to_string(), categories);
        mappings.insert("suppliers".to_string(), IdMapping::new());

        let written = write_audit_map(&path, &mappings).unwrap();
        assert_eq!(written, 2);

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["total_entries"], 2);
        assert_eq!(json["tables"]["categories"][0]["old_id"], 1);
        assert_eq!(json["tables"]["categories"][1]["new_id"], "b");
        assert_eq!(json["tables"]["suppliers"].as_array().unwrap().len(), 0);
    }
}
