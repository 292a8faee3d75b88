use crate::error::LoadError;
use async_trait::async_trait;
use model::{core::identifiers::QualifiedName, records::row::RowData};

/// Statement executor backed by a destination connection.
#[async_trait]
pub trait Destination: Send + Sync {
    async fn row_count(&self, table: &QualifiedName) -> Result<u64, LoadError>;

    async fn truncate(&self, table: &QualifiedName) -> Result<(), LoadError>;

    async fn begin(&self, table: &QualifiedName) -> Result<Box<dyn DestinationTx>, LoadError>;

    /// Stops checking `table`'s foreign keys until they are restored.
    async fn suspend_foreign_keys(&self, table: &QualifiedName) -> Result<(), LoadError>;

    /// Re-enables and re-checks `table`'s foreign keys against its current rows.
    async fn restore_foreign_keys(&self, table: &QualifiedName) -> Result<(), LoadError>;
}

/// An open destination transaction scoped to one table.
#[async_trait]
pub trait DestinationTx: Send {
    /// Inserts every row or none of them.
    async fn insert(&mut self, rows: &[RowData]) -> Result<u64, LoadError>;

    async fn commit(self: Box<Self>) -> Result<(), LoadError>;

    async fn rollback(self: Box<Self>) -> Result<(), LoadError>;
}
