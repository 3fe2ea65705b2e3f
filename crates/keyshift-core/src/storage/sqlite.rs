//! SQLite-backed storage collaborator.

use super::{Row, RunResult, Storage, Value};
use crate::error::Error;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::path::Path;

/// Storage over a single SQLite connection.
///
/// Calls are serialised through a mutex; the connection is never held
/// across an await point.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    /// Wrap an existing connection.
    ///
    /// Foreign-key enforcement is switched off: parent and child tables are
    /// rekeyed one at a time, so references are briefly inconsistent while a
    /// migration runs. Referential integrity is checked by the validator.
    pub fn from_connection(conn: Connection) -> Result<Self, Error> {
        conn.execute_batch("PRAGMA foreign_keys = OFF")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn execute(&self, sql: &str) -> Result<(), Error> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    async fn run(&self, sql: &str, params: &[Value]) -> Result<RunResult, Error> {
        let conn = self.conn.lock();
        let changes = conn.execute(sql, params_from_iter(params.iter()))?;
        Ok(RunResult {
            changes,
            last_insert_id: conn.last_insert_rowid(),
        })
    }

    async fn get_first(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        match rows.next()? {
            Some(row) => Ok(Some(read_row(row, column_count)?)),
            None => Ok(None),
        }
    }

    async fn get_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(read_row(row, column_count)?);
        }
        Ok(out)
    }
}

fn read_row(row: &rusqlite::Row<'_>, column_count: usize) -> Result<Row, Error> {
    let mut values = Vec::with_capacity(column_count);
    for idx in 0..column_count {
        values.push(from_value_ref(row.get_ref(idx)?)?);
    }
    Ok(Row(values))
}

fn from_value_ref(value: ValueRef<'_>) -> Result<Value, Error> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Text(bytes) => Value::Text(
            std::str::from_utf8(bytes)
                .map_err(|e| Error::InvalidData(format!("non UTF-8 text: {e}")))?
                .to_string(),
        ),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    })
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{column_type, count_rows, table_columns};

    async fn storage_with_table() -> SqliteStorage {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .execute("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT, weight REAL, data BLOB)")
            .await
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn test_run_and_query() {
        let storage = storage_with_table().await;

        let result = storage
            .run(
                "INSERT INTO items (label, weight, data) VALUES (?1, ?2, ?3)",
                &[Value::from("bolt"), Value::Real(1.5), Value::Blob(vec![1, 2])],
            )
            .await
            .unwrap();
        assert_eq!(result.changes, 1);
        assert_eq!(result.last_insert_id, 1);

        let row = storage
            .get_first("SELECT id, label, weight, data FROM items", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            row.into_values(),
            vec![
                Value::Integer(1),
                Value::Text("bolt".into()),
                Value::Real(1.5),
                Value::Blob(vec![1, 2]),
            ]
        );
    }

    #[tokio::test]
    async fn test_get_all_and_empty_first() {
        let storage = storage_with_table().await;
        for label in ["a", "b", "c"] {
            storage
                .run("INSERT INTO items (label) VALUES (?1)", &[Value::from(label)])
                .await
                .unwrap();
        }

        let rows = storage
            .get_all("SELECT label FROM items WHERE id > ?1 ORDER BY id", &[Value::Integer(1)])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_text(0).unwrap(), "b");

        let none = storage
            .get_first("SELECT label FROM items WHERE id = ?1", &[Value::Integer(99)])
            .await
            .unwrap();
        assert!(none.is_none());
        assert_eq!(count_rows(&storage, "items").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_introspection_helpers() {
        let storage = storage_with_table().await;

        assert_eq!(
            column_type(&storage, "items", "id").await.unwrap().as_deref(),
            Some("INTEGER")
        );
        assert_eq!(column_type(&storage, "missing", "id").await.unwrap(), None);
        assert_eq!(
            table_columns(&storage, "items").await.unwrap(),
            vec!["id", "label", "weight", "data"]
        );
    }

    #[tokio::test]
    async fn test_foreign_keys_not_enforced() {
        let storage = storage_with_table().await;
        storage
            .execute("CREATE TABLE child (id INTEGER PRIMARY KEY, item_id INTEGER REFERENCES items(id))")
            .await
            .unwrap();
        storage
            .run("INSERT INTO child (item_id) VALUES (?1)", &[Value::Integer(42)])
            .await
            .unwrap();
        let enabled = storage.get_first("PRAGMA foreign_keys", &[]).await.unwrap().unwrap();
        assert_eq!(enabled.get_i64(0).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_errors_surface() {
        let storage = storage_with_table().await;
        assert!(matches!(
            storage.execute("SELECT * FROM nowhere").await,
            Err(Error::Sqlite(_))
        ));
    }
}
