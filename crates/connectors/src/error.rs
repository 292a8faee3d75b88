use model::core::identifiers::QualifiedName;
use thiserror::Error;

/// Failures reading from the source database.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExtractError {
    /// Connection blip or lock timeout; expected to succeed on retry.
    #[error("Transient read failure on `{table}`: {message}")]
    Transient { table: QualifiedName, message: String },

    #[error("Source table `{table}` does not match its descriptor: {message}")]
    SchemaMismatch { table: QualifiedName, message: String },
}

impl ExtractError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExtractError::Transient { .. })
    }

    pub fn table(&self) -> &QualifiedName {
        match self {
            ExtractError::Transient { table, .. } | ExtractError::SchemaMismatch { table, .. } => {
                table
            }
        }
    }
}

/// Failures writing to the destination database.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoadError {
    #[error("Transient write failure on `{table}`: {message}")]
    Transient { table: QualifiedName, message: String },

    /// The destination rejected rows. Never retried.
    #[error("Constraint violation on `{table}`: {message}")]
    Constraint {
        table: QualifiedName,
        message: String,
        /// Positions inside the rejected batch.
        offending_rows: Vec<usize>,
    },

    #[error("Destination table `{table}` does not match the source: {message}")]
    SchemaMismatch { table: QualifiedName, message: String },

    #[error("Destination table `{table}` already holds {rows} rows")]
    DestinationNotEmpty { table: QualifiedName, rows: u64 },
}

impl LoadError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LoadError::Transient { .. })
    }

    pub fn table(&self) -> &QualifiedName {
        match self {
            LoadError::Transient { table, .. }
            | LoadError::Constraint { table, .. }
            | LoadError::SchemaMismatch { table, .. }
            | LoadError::DestinationNotEmpty { table, .. } => table,
        }
    }
}
