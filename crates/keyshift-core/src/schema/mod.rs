//! Declared table layouts for the migrated store.
//!
//! The schema is the single source of truth for which tables exist, what
//! columns they carry, and which columns are foreign keys. Migration and
//! validation operate over these definitions rather than over whatever the
//! live database happens to report.

mod catalog;
mod column;
mod table;

pub use catalog::{ForeignKeyRef, Schema};
pub use column::{ColumnDef, ColumnType};
pub use table::{TableDef, ID_COLUMN};
