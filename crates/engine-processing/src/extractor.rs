use chrono::Utc;
use connectors::{error::ExtractError, source::RowSource};
use futures::{Stream, stream};
use model::{
    catalog::table::TableDescriptor, pagination::cursor::Cursor, records::batch::Batch,
    records::row::RowData,
};
use std::sync::Arc;
use tracing::debug;

/// Pulls one table from the source in bounded batches, in key order.
///
/// Only the cursor of the last batch handed out is kept, never the rows,
/// so memory stays bounded by `batch_size`.
pub struct BatchExtractor {
    source: Arc<dyn RowSource>,
    table: TableDescriptor,
    batch_size: usize,
    cursor: Cursor,
    next_index: u64,
    exhausted: bool,
}

impl BatchExtractor {
    pub fn new(source: Arc<dyn RowSource>, table: TableDescriptor, batch_size: usize) -> Self {
        Self {
            source,
            table,
            batch_size: batch_size.max(1),
            cursor: Cursor::Start,
            next_index: 0,
            exhausted: false,
        }
    }

    /// Continues from `cursor`, numbering the next batch `next_index`.
    pub fn rewind(&mut self, cursor: Cursor, next_index: u64) {
        debug!(table = %self.table.name, cursor = %cursor, "Rewinding extractor");
        self.cursor = cursor;
        self.next_index = next_index;
        self.exhausted = false;
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Reads the next batch, or `None` once the table is exhausted.
    ///
    /// A failed read leaves the cursor untouched, so calling again retries
    /// the same batch.
    pub async fn next(&mut self) -> Result<Option<Batch>, ExtractError> {
        if self.exhausted {
            return Ok(None);
        }

        let rows = self
            .source
            .read_batch(&self.table, &self.cursor, self.batch_size)
            .await?;

        if rows.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        let next = self.advance(&rows)?;
        let batch = Batch {
            index: self.next_index,
            cursor: std::mem::replace(&mut self.cursor, next.clone()),
            next,
            rows,
            ts: Utc::now(),
        };

        // A short read means there is nothing after it.
        self.exhausted = batch.len() < self.batch_size;
        self.next_index += 1;

        Ok(Some(batch))
    }

    fn advance(&self, rows: &[RowData]) -> Result<Cursor, ExtractError> {
        if !self.table.has_primary_key() {
            let consumed = match self.cursor {
                Cursor::Offset { rows } => rows,
                _ => 0,
            };
            return Ok(Cursor::Offset {
                rows: consumed + rows.len() as u64,
            });
        }

        rows.last()
            .and_then(|row| row.key(&self.table.primary_key))
            .map(|values| Cursor::Key { values })
            .ok_or_else(|| ExtractError::SchemaMismatch {
                table: self.table.name.clone(),
                message: format!(
                    "row lacks primary key columns ({})",
                    self.table.primary_key.join(", ")
                ),
            })
    }

    /// Lazily yields batches until the table is exhausted or a read fails.
    pub fn into_stream(self) -> impl Stream<Item = Result<Batch, ExtractError>> {
        stream::try_unfold(self, |mut extractor| async move {
            Ok(extractor.next().await?.map(|batch| (batch, extractor)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::memory::{Fault, FaultPlan, MemorySource};
    use futures::TryStreamExt;
    use model::{
        core::{identifiers::QualifiedName, value::Value},
        records::row::FieldValue,
    };

    fn departments(rows: u64) -> TableDescriptor {
        TableDescriptor::new(QualifiedName::new("HR", "DEPARTMENTS"))
            .with_primary_key(["DEPARTMENT_ID"])
            .with_estimated_rows(rows)
    }

    fn source(table: &TableDescriptor) -> Arc<MemorySource> {
        Arc::new(MemorySource::from_catalog(std::slice::from_ref(table)))
    }

    #[tokio::test]
    async fn yields_bounded_batches_in_key_order() {
        let table = departments(27);
        let mut extractor = BatchExtractor::new(source(&table), table.clone(), 10);

        let mut sizes = Vec::new();
        let mut last_key: Option<Value> = None;
        while let Some(batch) = extractor.next().await.unwrap() {
            let first = batch.rows[0].get_value("DEPARTMENT_ID");
            if let Some(prev) = &last_key {
                assert!(first > *prev);
            }
            last_key = Some(batch.rows[batch.len() - 1].get_value("DEPARTMENT_ID"));
            sizes.push(batch.len());
        }

        assert_eq!(sizes, vec![10, 10, 7]);
        assert!(extractor.is_exhausted());
        assert_eq!(extractor.next_index(), 3);
    }

    #[tokio::test]
    async fn exact_multiple_needs_one_empty_read() {
        let table = departments(20);
        let src = source(&table);
        let mut extractor = BatchExtractor::new(src.clone(), table.clone(), 10);

        assert_eq!(extractor.next().await.unwrap().unwrap().len(), 10);
        assert_eq!(extractor.next().await.unwrap().unwrap().len(), 10);
        assert!(extractor.next().await.unwrap().is_none());
        assert_eq!(src.read_log().await.len(), 3);
    }

    #[tokio::test]
    async fn failed_read_keeps_the_cursor() {
        let table = departments(15);
        let src = source(&table);
        let mut extractor = BatchExtractor::new(src.clone(), table.clone(), 10);
        extractor.next().await.unwrap();

        src.inject(&table.name, FaultPlan::new(Fault::Transient).times(1))
            .await;
        let cursor = extractor.cursor().clone();
        assert!(extractor.next().await.unwrap_err().is_transient());
        assert_eq!(extractor.cursor(), &cursor);

        let batch = extractor.next().await.unwrap().unwrap();
        assert_eq!(batch.index, 1);
        assert_eq!(batch.rows[0].get_value("DEPARTMENT_ID"), Value::Int(11));
    }

    #[tokio::test]
    async fn rewind_restarts_from_a_cursor() {
        let table = departments(25);
        let mut extractor = BatchExtractor::new(source(&table), table.clone(), 10);
        let first = extractor.next().await.unwrap().unwrap();
        extractor.next().await.unwrap();

        extractor.rewind(first.next.clone(), 1);
        let again = extractor.next().await.unwrap().unwrap();
        assert_eq!(again.index, 1);
        assert_eq!(again.rows[0].get_value("DEPARTMENT_ID"), Value::Int(11));
    }

    #[tokio::test]
    async fn keyless_tables_page_by_offset() {
        let table = TableDescriptor::new(QualifiedName::new("HR", "AUDIT_LOG"));
        let rows = (1..=5_i64)
            .map(|i| RowData::new(vec![FieldValue::new("EVENT", i)]))
            .collect();
        let src = Arc::new(MemorySource::new().with_table(&table, rows));

        let batches: Vec<Batch> = BatchExtractor::new(src, table, 2)
            .into_stream()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].cursor, Cursor::Offset { rows: 4 });
        assert_eq!(batches[2].next, Cursor::Offset { rows: 5 });
    }
}
