//! Core error types.

use thiserror::Error;

/// Storage collaborator errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying SQLite error.
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A value had an unexpected type or shape.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A column was read from a row that does not have it.
    #[error("column {index} out of range (row has {len} columns)")]
    ColumnOutOfRange {
        /// Requested column index.
        index: usize,
        /// Number of columns in the row.
        len: usize,
    },
}

/// Schema definition errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// Two tables share a name.
    #[error("duplicate table: {0}")]
    DuplicateTable(String),

    /// A foreign key names a table the schema does not declare.
    #[error("{table}.{column} references unknown table {references}")]
    UnknownReference {
        /// Referencing table.
        table: String,
        /// Foreign-key column.
        column: String,
        /// Referenced table.
        references: String,
    },

    /// A foreign key points at a table that would migrate at the same time or later.
    #[error("{table}.{column} references {references}, which does not rank before {table}")]
    DependencyOrder {
        /// Referencing table.
        table: String,
        /// Foreign-key column.
        column: String,
        /// Referenced table.
        references: String,
    },

    /// A table was looked up that the schema does not declare.
    #[error("unknown table: {0}")]
    UnknownTable(String),
}
