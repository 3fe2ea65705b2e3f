//! Column definitions for tables.

/// Storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// 64-bit signed integer.
    Integer,
    /// Floating point.
    Real,
    /// UTF-8 text.
    Text,
    /// Raw bytes.
    Blob,
}

impl ColumnType {
    /// SQL type name used in DDL.
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Blob => "BLOB",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// A non-key column within a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Storage class (for foreign keys, the legacy integer class).
    pub column_type: ColumnType,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Referenced table when this column is a foreign key into `<table>.id`.
    pub references: Option<String>,
    /// SQL default expression, e.g. `CURRENT_TIMESTAMP`.
    pub default: Option<String>,
}

impl ColumnDef {
    /// Create a required column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            references: None,
            default: None,
        }
    }

    /// Create a nullable column.
    pub fn optional(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, column_type)
        }
    }

    /// Create a required foreign key into `references.id`.
    pub fn foreign_key(name: impl Into<String>, references: impl Into<String>) -> Self {
        Self {
            references: Some(references.into()),
            ..Self::new(name, ColumnType::Integer)
        }
    }

    /// Create a nullable foreign key into `references.id`.
    pub fn optional_foreign_key(name: impl Into<String>, references: impl Into<String>) -> Self {
        Self {
            nullable: true,
            ..Self::foreign_key(name, references)
        }
    }

    /// Set the SQL default expression.
    pub fn with_default(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }

    /// Whether this column is a foreign key.
    pub fn is_foreign_key(&self) -> bool {
        self.references.is_some()
    }

    /// Column type once keys are identifiers.
    pub fn migrated_type(&self) -> ColumnType {
        if self.is_foreign_key() {
            ColumnType::Text
        } else {
            self.column_type
        }
    }
}
