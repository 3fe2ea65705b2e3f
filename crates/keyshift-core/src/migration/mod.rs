//! Key migration engine.
//!
//! Moves every table of a [`Schema`](crate::schema::Schema) from integer
//! primary keys to random identifiers:
//! - Snapshot backup of every table before anything is written
//! - Per-table rebuild into a staging table, swapped in on commit
//! - Foreign-key rewriting through in-memory id mappings
//! - Post-migration validation in four categories
//! - Automatic rollback from the snapshot on any failure
//!
//! # Example
//!
//! ```ignore
//! use keyshift_core::migration::{MigrationConfig, MigrationExecutor, UuidGenerator};
//! use keyshift_core::schema::Schema;
//! use keyshift_core::storage::SqliteStorage;
//! use std::sync::Arc;
//!
//! let storage = Arc::new(SqliteStorage::open("pos.db")?);
//! let executor = MigrationExecutor::new(
//!     storage,
//!     Arc::new(UuidGenerator),
//!     Schema::point_of_sale(),
//!     MigrationConfig::default(),
//! );
//!
//! let report = executor.execute_migration().await;
//! if !report.success {
//!     eprintln!("{}", report.errors.join("\n"));
//! }
//! ```

pub mod audit;
pub mod backup;
pub mod error;
pub mod executor;
pub mod keygen;
pub mod report;
pub mod rewrite;
pub mod state;
pub mod table;
pub mod validator;

pub use audit::write_audit_map;
pub use backup::{backup_table_name, Backup, TableSnapshot, MANIFEST_TABLE};
pub use error::{MigrationError, VALIDATION_FAILED_PREFIX};
pub use executor::{
    CancelHandle, MigrationConfig, MigrationExecutor, ALREADY_COMPLETED_WARNING,
    ROLLBACK_COMPLETED_WARNING,
};
pub use keygen::{is_valid, KeyGenerator, UuidGenerator, IDENTIFIER_LEN, NIL_IDENTIFIER};
pub use report::{CategoryResult, MigrationReport, ValidationCategory, ValidationReport};
pub use rewrite::{ReferenceRewriter, RewriteOutcome};
pub use state::{MigrationState, MigrationStatus, TableProgress, TableStatus};
pub use table::{
    staging_table_name, IdMapping, IdMappings, MigratedTable, Record, TableMigrator,
    DEFAULT_BATCH_SIZE,
};
pub use validator::Validator;
