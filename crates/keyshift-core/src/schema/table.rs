//! Table definitions.

use super::column::{ColumnDef, ColumnType};
use crate::storage::quote_ident;

/// Name of the primary-key column every table carries.
pub const ID_COLUMN: &str = "id";

/// A table definition.
///
/// The `id` column is implicit: an integer before migration, an identifier
/// afterwards. `columns` lists every other column in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    /// Table name (unique within schema).
    pub name: String,
    /// Dependency rank. Referenced tables must rank lower than referencing ones.
    pub rank: u32,
    /// Non-key columns.
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Create a new table definition.
    pub fn new(name: impl Into<String>, rank: u32) -> Self {
        Self {
            name: name.into(),
            rank,
            columns: Vec::new(),
        }
    }

    /// Add a column.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Foreign-key columns in declaration order.
    pub fn foreign_keys(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.is_foreign_key())
    }

    /// Foreign-key columns pointing at `table`.
    pub fn foreign_keys_into<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a ColumnDef> {
        self.foreign_keys()
            .filter(move |c| c.references.as_deref() == Some(table))
    }

    /// All column names including `id`, in row order.
    pub fn column_names(&self) -> Vec<&str> {
        std::iter::once(ID_COLUMN)
            .chain(self.columns.iter().map(|c| c.name.as_str()))
            .collect()
    }

    /// Quoted, comma-separated column list for SELECT/INSERT.
    pub fn select_list(&self) -> String {
        self.column_names()
            .into_iter()
            .map(quote_ident)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// DDL for the pre-migration, integer-keyed layout.
    pub fn legacy_ddl(&self) -> String {
        let mut parts = vec![format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT",
            quote_ident(ID_COLUMN)
        )];
        parts.extend(self.columns.iter().map(|c| column_ddl(c, c.column_type)));
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.name),
            parts.join(", ")
        )
    }

    /// DDL for the identifier-keyed layout, created under `table_name`.
    ///
    /// Built from the declared columns only: nullability, defaults and
    /// references carry over, but CHECK constraints or other clauses present
    /// in the live table and absent from this definition are not kept.
    pub fn uuid_ddl(&self, table_name: &str) -> String {
        let mut parts = vec![format!("{} TEXT PRIMARY KEY NOT NULL", quote_ident(ID_COLUMN))];
        parts.extend(self.columns.iter().map(|c| column_ddl(c, c.migrated_type())));
        format!("CREATE TABLE {} ({})", quote_ident(table_name), parts.join(", "))
    }

    /// Index DDL for every foreign-key column.
    pub fn foreign_key_indexes(&self) -> Vec<String> {
        self.foreign_keys()
            .map(|c| {
                format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {}({})",
                    quote_ident(&format!("idx_{}_{}", self.name, c.name)),
                    quote_ident(&self.name),
                    quote_ident(&c.name)
                )
            })
            .collect()
    }
}

fn column_ddl(column: &ColumnDef, column_type: ColumnType) -> String {
    let mut ddl = format!("{} {}", quote_ident(&column.name), column_type.sql_name());
    if !column.nullable {
        ddl.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        ddl.push_str(&format!(" DEFAULT {default}"));
    }
    if let Some(references) = &column.references {
        ddl.push_str(&format!(
            " REFERENCES {}({})",
            quote_ident(references),
            quote_ident(ID_COLUMN)
        ));
    }
    ddl
}
