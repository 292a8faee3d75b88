use crate::{
    catalog::table::TableDescriptor, core::identifiers::QualifiedName,
    execution::failure::FailureReport,
};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Queued,
    Running,
    Completed,
    Failed,
    /// Abandoned at a batch boundary because the run was cancelled.
    Cancelled,
}

impl TableStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TableStatus::Completed | TableStatus::Failed | TableStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Queued => "queued",
            TableStatus::Running => "running",
            TableStatus::Completed => "completed",
            TableStatus::Failed => "failed",
            TableStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one table within one run.
///
/// Only the table's worker mutates it; everyone else sees snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRunState {
    pub table: QualifiedName,
    pub destination: QualifiedName,
    pub level: usize,
    pub status: TableStatus,
    pub rows_copied: u64,
    /// Plan-time estimate; advisory only.
    pub total_rows: u64,
    pub elapsed: Duration,
    pub current_batch: u64,
    pub retries: u32,
    pub rows_per_second: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<FailureReport>,
}

impl TableRunState {
    pub fn queued(descriptor: &TableDescriptor, level: usize) -> Self {
        Self {
            table: descriptor.name.clone(),
            destination: descriptor.destination_name(),
            level,
            status: TableStatus::Queued,
            rows_copied: 0,
            total_rows: descriptor.estimated_rows,
            elapsed: Duration::ZERO,
            current_batch: 0,
            retries: 0,
            rows_per_second: 0.0,
            last_error: None,
        }
    }

    /// Updates elapsed time and recomputes the copy rate from it.
    pub fn record_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
        let secs = elapsed.as_secs_f64();
        self.rows_per_second = if secs > 0.0 {
            self.rows_copied as f64 / secs
        } else {
            0.0
        };
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
