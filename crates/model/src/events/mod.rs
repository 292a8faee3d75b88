use crate::execution::status::TableRunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happened to a table, as reported by its worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TableEventKind {
    Started,

    BatchCommitted { batch_index: u64, rows: u64 },

    RetryScheduled {
        attempt: u32,
        delay: Duration,
        error: String,
    },

    /// An open table transaction was rolled back; its rows no longer count.
    RolledBack { rows_discarded: u64 },

    /// The `skip` conflict policy left a non-empty destination untouched.
    Skipped { existing_rows: u64 },

    EstimateMismatch { estimated: u64, copied: u64 },

    Completed,

    Failed,

    Cancelled,
}

/// Status event pushed from a table worker to the scheduler.
///
/// Carries a full snapshot so the scheduler never reads worker state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEvent {
    pub kind: TableEventKind,
    pub snapshot: TableRunState,
    pub at: DateTime<Utc>,
}

impl TableEvent {
    pub fn new(kind: TableEventKind, snapshot: TableRunState) -> Self {
        Self {
            kind,
            snapshot,
            at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            TableEventKind::Completed | TableEventKind::Failed | TableEventKind::Cancelled
        )
    }
}
