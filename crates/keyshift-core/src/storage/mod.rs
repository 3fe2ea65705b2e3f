//! Storage collaborator used by the migration engine.
//!
//! The engine consumes four primitives from an already-connected store:
//! batch execution, single mutations, single-row queries and multi-row
//! queries. Connection lifecycle belongs to the host.
//!
//! The migration assumes exclusive access to the store for its duration.
//! Nothing here enforces that; the host must not run application traffic
//! against the same tables while a migration is in flight.

mod sqlite;
mod value;

pub use sqlite::SqliteStorage;
pub use value::{Row, Value};

use crate::error::Error;
use async_trait::async_trait;

/// Metadata returned by a single mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunResult {
    /// Rows changed by the statement.
    pub changes: usize,
    /// Rowid of the last inserted row.
    pub last_insert_id: i64,
}

/// Storage operations the migration engine needs.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Execute one or more statements without parameters (DDL, transaction control).
    async fn execute(&self, sql: &str) -> Result<(), Error>;

    /// Execute a single parameterised mutation.
    async fn run(&self, sql: &str, params: &[Value]) -> Result<RunResult, Error>;

    /// Fetch the first row of a query, if any.
    async fn get_first(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, Error>;

    /// Fetch every row of a query.
    async fn get_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, Error>;
}

/// Quote an identifier for use in SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Declared type of a column, or `None` if the table or column is absent.
pub async fn column_type(
    storage: &dyn Storage,
    table: &str,
    column: &str,
) -> Result<Option<String>, Error> {
    let row = storage
        .get_first(
            "SELECT type FROM pragma_table_info(?1) WHERE name = ?2",
            &[Value::from(table), Value::from(column)],
        )
        .await?;
    row.map(|r| r.get_text(0).map(|t| t.to_ascii_uppercase()))
        .transpose()
}

/// Column names of a table in declaration order. Empty if the table is absent.
pub async fn table_columns(storage: &dyn Storage, table: &str) -> Result<Vec<String>, Error> {
    let rows = storage
        .get_all(
            "SELECT name FROM pragma_table_info(?1) ORDER BY cid",
            &[Value::from(table)],
        )
        .await?;
    rows.iter().map(|r| r.get_text(0).map(str::to_string)).collect()
}

/// Number of rows in a table.
pub async fn count_rows(storage: &dyn Storage, table: &str) -> Result<u64, Error> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    let row = storage
        .get_first(&sql, &[])
        .await?
        .ok_or_else(|| Error::InvalidData(format!("COUNT(*) on {table} returned no row")))?;
    Ok(row.get_i64(0)?.max(0) as u64)
}
