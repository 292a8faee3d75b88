use model::core::identifiers::QualifiedName;
use thiserror::Error;

/// Bad plan inputs. Always fatal: no row moves once one is raised.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Table `{table}` has a foreign key to `{references}`, which is not in the catalog")]
    DanglingForeignKey {
        table: QualifiedName,
        references: QualifiedName,
    },

    #[error("Table `{0}` appears more than once in the catalog")]
    DuplicateTable(QualifiedName),

    #[error("Tables `{first}` and `{second}` both map to destination `{destination}`")]
    DuplicateDestination {
        destination: QualifiedName,
        first: QualifiedName,
        second: QualifiedName,
    },

    #[error("Batch size must be positive, got {0}")]
    InvalidBatchSize(usize),

    #[error("Max parallel tables must be at least 1, got {0}")]
    InvalidParallelism(usize),

    #[error("Retry max delay ({max_ms} ms) is below the base delay ({base_ms} ms)")]
    InvalidRetryDelays { base_ms: u64, max_ms: u64 },

    #[error("Idle attempt limit must be at least 1")]
    InvalidIdleLimit,
}
