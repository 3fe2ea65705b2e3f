//! Dynamically typed values exchanged with the store.

use crate::error::Error;

/// A single SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// Floating point.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl Value {
    /// Whether the value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow as text, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Read as integer, if this is an integer value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A positional result row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(pub Vec<Value>);

impl Row {
    /// Number of columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value at `index`.
    pub fn get(&self, index: usize) -> Result<&Value, Error> {
        self.0.get(index).ok_or(Error::ColumnOutOfRange {
            index,
            len: self.0.len(),
        })
    }

    /// Integer at `index`.
    pub fn get_i64(&self, index: usize) -> Result<i64, Error> {
        match self.get(index)? {
            Value::Integer(i) => Ok(*i),
            other => Err(Error::InvalidData(format!(
                "expected integer in column {index}, found {other}"
            ))),
        }
    }

    /// Text at `index`.
    pub fn get_text(&self, index: usize) -> Result<&str, Error> {
        match self.get(index)? {
            Value::Text(s) => Ok(s),
            other => Err(Error::InvalidData(format!(
                "expected text in column {index}, found {other}"
            ))),
        }
    }

    /// Consume the row into its values.
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}
