//! Keyshift Core - integer-to-identifier primary key migration.
//!
//! This crate provides the schema model, the storage seam, and the
//! migration engine used by the `keyshift` command-line tool.

pub mod error;
pub mod migration;
pub mod schema;
pub mod storage;

pub use error::{Error, SchemaError};
pub use migration::{
    CancelHandle, KeyGenerator, MigrationConfig, MigrationError, MigrationExecutor,
    MigrationReport, MigrationStatus, UuidGenerator, ValidationCategory, ValidationReport,
};
pub use schema::{ColumnDef, ColumnType, Schema, TableDef};
pub use storage::{Row, SqliteStorage, Storage, Value};
