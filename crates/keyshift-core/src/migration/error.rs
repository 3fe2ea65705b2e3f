//! Migration-specific error types.

use crate::error::SchemaError;
use thiserror::Error;

/// Prefix on every error raised while validating a migrated schema.
pub const VALIDATION_FAILED_PREFIX: &str = "Migration validation failed: ";

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The table's primary key is already an identifier. Informational.
    #[error("table {table} was already migrated")]
    AlreadyMigrated {
        /// The table that was skipped.
        table: String,
    },

    /// Writing a table failed; the table's transaction was rolled back.
    #[error("write failed for {table}: {reason}")]
    WriteFailed {
        /// The table being written.
        table: String,
        /// The reason for failure.
        reason: String,
    },

    /// The key generator repeated an identifier within one table.
    #[error("{table}: duplicate identifier '{identifier}' (2 rows)")]
    DuplicateIdentifier {
        /// The table being migrated.
        table: String,
        /// The repeated identifier.
        identifier: String,
    },

    /// Rewriting foreign keys in a dependent table failed.
    #[error("rewriting {table}.{column} failed: {reason}")]
    RewriteFailed {
        /// The dependent table.
        table: String,
        /// The foreign-key column.
        column: String,
        /// The reason for failure.
        reason: String,
    },

    /// Foreign keys were rewritten before the referenced table had a mapping.
    #[error("no id mapping for {references} (needed by {table})")]
    MissingMapping {
        /// The dependent table.
        table: String,
        /// The referenced table without a mapping.
        references: String,
    },

    /// The live table does not match its declared layout.
    #[error("schema mismatch in {table}: {message}")]
    SchemaMismatch {
        /// The table that drifted.
        table: String,
        /// Description of the difference.
        message: String,
    },

    /// Some tables already have identifier keys and others do not, with no
    /// backup to recover from.
    #[error("store is partially migrated (identifier keys in {}); restore it before migrating", tables.join(", "))]
    PartiallyMigrated {
        /// Tables whose keys are already identifiers.
        tables: Vec<String>,
    },

    /// Restoring the backup left by an interrupted run failed.
    #[error("Recovery of interrupted migration failed: {reason}")]
    RecoveryFailed {
        /// The reason recovery failed.
        reason: String,
    },

    /// One or more validation categories failed.
    #[error("Migration validation failed: {message}")]
    ValidationFailed {
        /// Failing categories and their errors.
        message: String,
    },

    /// Restoring the pre-migration snapshot failed.
    #[error("Rollback failed: {reason}")]
    RollbackFailed {
        /// The reason rollback failed.
        reason: String,
    },

    /// The run was cancelled between steps.
    #[error("migration cancelled")]
    Cancelled,

    /// Invalid table definitions.
    #[error("invalid schema: {0}")]
    Schema(#[from] SchemaError),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] crate::error::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// Whether this error is informational rather than a failure.
    pub fn is_informational(&self) -> bool {
        matches!(self, MigrationError::AlreadyMigrated { .. })
    }
}
