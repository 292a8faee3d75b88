use connectors::error::{ExtractError, LoadError};
use model::{
    core::identifiers::QualifiedName,
    execution::failure::{FailureKind, FailureReport},
};
use thiserror::Error;

/// Why a single table stopped short of completion.
///
/// Never aborts sibling tables; the scheduler records it and moves on.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TableError {
    #[error("`{table}` gave up after {attempts} attempts at batch {batch_index}: {cause}")]
    RetriesExhausted {
        table: QualifiedName,
        batch_index: u64,
        attempts: u32,
        cause: String,
    },

    #[error("`{table}` batch {batch_index} rejected by the destination: {cause}")]
    Constraint {
        table: QualifiedName,
        batch_index: u64,
        cause: String,
        offending_rows: Vec<usize>,
    },

    #[error("`{table}` schema mismatch at batch {batch_index}: {cause}")]
    SchemaMismatch {
        table: QualifiedName,
        batch_index: u64,
        cause: String,
    },

    #[error("Destination for `{table}` already holds {rows} rows")]
    DestinationNotEmpty { table: QualifiedName, rows: u64 },

    #[error("`{table}` made no progress across {attempts} attempts at batch {batch_index}")]
    Stalled {
        table: QualifiedName,
        batch_index: u64,
        attempts: u32,
    },

    #[error("`{table}` could not re-apply deferred foreign keys: {cause}")]
    DeferredConstraint {
        table: QualifiedName,
        cause: String,
        offending_rows: Vec<usize>,
    },

    #[error("`{table}` worker failed: {cause}")]
    Internal { table: QualifiedName, cause: String },
}

impl TableError {
    /// Maps a non-retryable (or out of retries) extractor error.
    pub fn from_extract(err: ExtractError, batch_index: u64, attempts: u32) -> Self {
        match err {
            ExtractError::Transient { table, message } => TableError::RetriesExhausted {
                table,
                batch_index,
                attempts,
                cause: message,
            },
            ExtractError::SchemaMismatch { table, message } => TableError::SchemaMismatch {
                table,
                batch_index,
                cause: message,
            },
        }
    }

    /// Maps a non-retryable (or out of retries) loader error.
    pub fn from_load(err: LoadError, batch_index: u64, attempts: u32) -> Self {
        match err {
            LoadError::Transient { table, message } => TableError::RetriesExhausted {
                table,
                batch_index,
                attempts,
                cause: message,
            },
            LoadError::Constraint {
                table,
                message,
                offending_rows,
            } => TableError::Constraint {
                table,
                batch_index,
                cause: message,
                offending_rows,
            },
            LoadError::SchemaMismatch { table, message } => TableError::SchemaMismatch {
                table,
                batch_index,
                cause: message,
            },
            LoadError::DestinationNotEmpty { table, rows } => {
                TableError::DestinationNotEmpty { table, rows }
            }
        }
    }

    pub fn table(&self) -> &QualifiedName {
        match self {
            TableError::RetriesExhausted { table, .. }
            | TableError::Constraint { table, .. }
            | TableError::SchemaMismatch { table, .. }
            | TableError::DestinationNotEmpty { table, .. }
            | TableError::Stalled { table, .. }
            | TableError::DeferredConstraint { table, .. }
            | TableError::Internal { table, .. } => table,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            TableError::RetriesExhausted { .. } => FailureKind::RetriesExhausted,
            TableError::Constraint { .. } | TableError::DeferredConstraint { .. } => {
                FailureKind::Constraint
            }
            TableError::SchemaMismatch { .. } => FailureKind::SchemaMismatch,
            TableError::DestinationNotEmpty { .. } => FailureKind::Conflict,
            TableError::Stalled { .. } => FailureKind::Stalled,
            TableError::Internal { .. } => FailureKind::Internal,
        }
    }

    pub fn batch_index(&self) -> Option<u64> {
        match self {
            TableError::RetriesExhausted { batch_index, .. }
            | TableError::Constraint { batch_index, .. }
            | TableError::SchemaMismatch { batch_index, .. }
            | TableError::Stalled { batch_index, .. } => Some(*batch_index),
            _ => None,
        }
    }

    pub fn to_report(&self, attempts: u32) -> FailureReport {
        let offending_rows = match self {
            TableError::Constraint { offending_rows, .. }
            | TableError::DeferredConstraint { offending_rows, .. } => offending_rows.clone(),
            _ => Vec::new(),
        };

        FailureReport {
            kind: self.kind(),
            table: self.table().clone(),
            batch_index: self.batch_index(),
            message: self.to_string(),
            offending_rows,
            attempts,
        }
    }
}
