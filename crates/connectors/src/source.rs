use crate::error::ExtractError;
use async_trait::async_trait;
use model::{catalog::table::TableDescriptor, pagination::cursor::Cursor, records::row::RowData};

/// Row stream provider backed by a source connection.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Reads at most `limit` rows positioned after `after`.
    ///
    /// Rows come back in primary-key order, or in a stable natural order
    /// when the table has no primary key (the cursor is then a row offset).
    /// Fewer than `limit` rows means the table is exhausted.
    async fn read_batch(
        &self,
        table: &TableDescriptor,
        after: &Cursor,
        limit: usize,
    ) -> Result<Vec<RowData>, ExtractError>;
}
