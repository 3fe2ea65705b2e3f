//! Migration run state.
//!
//! Tracks which phase a run is in and per-table progress, for logging and
//! the final report.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Phase of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Run created, key layout not yet inspected.
    NotStarted,
    /// Snapshotting tables for rollback.
    BackingUp,
    /// Migrating tables and rewriting references.
    Migrating,
    /// Running the validation battery.
    Validating,
    /// Restoring the snapshot.
    RollingBack,
    /// Migration finished and validated.
    Complete,
    /// Every table already had identifier keys.
    AlreadyComplete,
    /// Migration failed (rolled back, unless rollback also failed).
    Failed,
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStatus::NotStarted => write!(f, "not_started"),
            MigrationStatus::BackingUp => write!(f, "backing_up"),
            MigrationStatus::Migrating => write!(f, "migrating"),
            MigrationStatus::Validating => write!(f, "validating"),
            MigrationStatus::RollingBack => write!(f, "rolling_back"),
            MigrationStatus::Complete => write!(f, "complete"),
            MigrationStatus::AlreadyComplete => write!(f, "already_complete"),
            MigrationStatus::Failed => write!(f, "failed"),
        }
    }
}

impl MigrationStatus {
    /// Whether the run has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Complete | MigrationStatus::AlreadyComplete | MigrationStatus::Failed
        )
    }
}

/// Status of a single table within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    /// Not yet reached.
    Pending,
    /// Being migrated.
    InProgress,
    /// Migrated.
    Complete,
    /// Already migrated; left untouched.
    Skipped,
    /// Migration failed.
    Failed,
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableStatus::Pending => write!(f, "pending"),
            TableStatus::InProgress => write!(f, "in_progress"),
            TableStatus::Complete => write!(f, "complete"),
            TableStatus::Skipped => write!(f, "skipped"),
            TableStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Progress of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableProgress {
    /// Table name.
    pub table: String,
    /// Current status.
    pub status: TableStatus,
    /// When migration of this table started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When it finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Rows migrated.
    pub migrated_count: u64,
    /// Error message if the table failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableProgress {
    /// Create a pending entry.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            status: TableStatus::Pending,
            started_at: None,
            completed_at: None,
            migrated_count: 0,
            error: None,
        }
    }

    /// Mark the table as started.
    pub fn start(&mut self) {
        self.status = TableStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    /// Mark the table as migrated.
    pub fn complete(&mut self, migrated_count: u64) {
        self.status = TableStatus::Complete;
        self.migrated_count = migrated_count;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the table as skipped.
    pub fn skip(&mut self) {
        self.status = TableStatus::Skipped;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the table as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TableStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }
}

/// State of one migration run.
#[derive(Debug, Clone)]
pub struct MigrationState {
    /// Current phase.
    pub status: MigrationStatus,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal phase.
    pub completed_at: Option<DateTime<Utc>>,
    /// Per-table progress in migration order.
    pub tables: Vec<TableProgress>,
}

impl MigrationState {
    /// Create state for a run over `tables`.
    pub fn new<'a>(tables: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            status: MigrationStatus::NotStarted,
            started_at: Utc::now(),
            completed_at: None,
            tables: tables.into_iter().map(TableProgress::new).collect(),
        }
    }

    /// Move to `next`, logging the transition.
    pub fn transition(&mut self, next: MigrationStatus) {
        tracing::info!(from = %self.status, to = %next, "migration phase change");
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }

    /// Progress entry for `table`.
    pub fn table_mut(&mut self, table: &str) -> Option<&mut TableProgress> {
        self.tables.iter_mut().find(|t| t.table == table)
    }

    /// Wall-clock duration so far (or total, once terminal).
    pub fn elapsed(&self) -> chrono::Duration {
        self.completed_at.unwrap_or_else(Utc::now) - self.started_at
    }
}
