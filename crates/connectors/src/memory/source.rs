use crate::{
    error::ExtractError,
    fixture,
    memory::fault::{Fault, FaultPlan},
    source::RowSource,
};
use async_trait::async_trait;
use model::{
    catalog::table::TableDescriptor, core::identifiers::QualifiedName,
    pagination::cursor::Cursor, records::row::RowData,
};
use std::{cmp::Ordering, collections::HashMap};
use tokio::sync::Mutex;
use tracing::debug;

/// Source tables held in memory, sorted by primary key.
#[derive(Default)]
pub struct MemorySource {
    tables: HashMap<QualifiedName, Vec<RowData>>,
    faults: Mutex<HashMap<QualifiedName, FaultPlan>>,
    reads: Mutex<Vec<(QualifiedName, Cursor)>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every catalog table filled with generated rows (see [`fixture::rows_for`]).
    pub fn from_catalog(catalog: &[TableDescriptor]) -> Self {
        catalog.iter().fold(Self::new(), |source, table| {
            source.with_table(table, fixture::rows_for(table, catalog))
        })
    }

    pub fn with_table(mut self, table: &TableDescriptor, mut rows: Vec<RowData>) -> Self {
        if table.has_primary_key() {
            rows.sort_by(|a, b| {
                a.key(&table.primary_key)
                    .partial_cmp(&b.key(&table.primary_key))
                    .unwrap_or(Ordering::Equal)
            });
        }
        self.tables.insert(table.name.clone(), rows);
        self
    }

    pub fn row_count(&self, table: &QualifiedName) -> usize {
        self.tables.get(table).map_or(0, Vec::len)
    }

    pub async fn inject(&self, table: &QualifiedName, plan: FaultPlan) {
        self.faults.lock().await.insert(table.clone(), plan);
    }

    pub async fn clear_faults(&self) {
        self.faults.lock().await.clear();
    }

    /// Every read served so far, in arrival order.
    pub async fn read_log(&self) -> Vec<(QualifiedName, Cursor)> {
        self.reads.lock().await.clone()
    }

    async fn next_fault(&self, table: &QualifiedName) -> Option<Fault> {
        self.faults.lock().await.get_mut(table).and_then(FaultPlan::next)
    }
}

#[async_trait]
impl RowSource for MemorySource {
    async fn read_batch(
        &self,
        table: &TableDescriptor,
        after: &Cursor,
        limit: usize,
    ) -> Result<Vec<RowData>, ExtractError> {
        self.reads
            .lock()
            .await
            .push((table.name.clone(), after.clone()));

        match self.next_fault(&table.name).await {
            Some(Fault::Transient) => {
                return Err(ExtractError::Transient {
                    table: table.name.clone(),
                    message: "ORA-03113: end-of-file on communication channel".into(),
                });
            }
            Some(Fault::SchemaMismatch | Fault::Constraint) => {
                return Err(ExtractError::SchemaMismatch {
                    table: table.name.clone(),
                    message: "ORA-00904: invalid identifier".into(),
                });
            }
            Some(Fault::Delay(delay)) => tokio::time::sleep(delay).await,
            None => {}
        }

        let rows = self
            .tables
            .get(&table.name)
            .ok_or_else(|| ExtractError::SchemaMismatch {
                table: table.name.clone(),
                message: "table does not exist in the source".into(),
            })?;

        if table.has_primary_key()
            && rows
                .first()
                .is_some_and(|row| row.key(&table.primary_key).is_none())
        {
            return Err(ExtractError::SchemaMismatch {
                table: table.name.clone(),
                message: format!(
                    "primary key columns ({}) missing from source rows",
                    table.primary_key.join(", ")
                ),
            });
        }

        let start = match after {
            Cursor::Start => 0,
            Cursor::Offset { rows: consumed } => (*consumed as usize).min(rows.len()),
            Cursor::Key { values } => rows.partition_point(|row| {
                row.key(&table.primary_key)
                    .is_some_and(|key| key.as_slice() <= values.as_slice())
            }),
        };

        let batch: Vec<RowData> = rows[start..].iter().take(limit).cloned().collect();
        debug!(table = %table.name, cursor = %after, rows = batch.len(), "Served source batch");
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{core::value::Value, records::row::FieldValue};

    fn jobs() -> TableDescriptor {
        TableDescriptor::new(QualifiedName::new("HR", "JOBS")).with_primary_key(["JOB_ID"])
    }

    fn row(id: i64) -> RowData {
        RowData::new(vec![
            FieldValue::new("JOB_ID", id),
            FieldValue::new("JOB_TITLE", format!("Job {id}")),
        ])
    }

    #[tokio::test]
    async fn reads_in_key_order_after_cursor() {
        let source = MemorySource::new().with_table(&jobs(), vec![row(3), row(1), row(2), row(4)]);

        let first = source.read_batch(&jobs(), &Cursor::Start, 2).await.unwrap();
        assert_eq!(
            first.iter().map(|r| r.get_value("JOB_ID")).collect::<Vec<_>>(),
            vec![Value::Int(1), Value::Int(2)]
        );

        let cursor = Cursor::Key {
            values: vec![Value::Int(2)],
        };
        let rest = source.read_batch(&jobs(), &cursor, 10).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].get_value("JOB_ID"), Value::Int(3));
    }

    #[tokio::test]
    async fn offset_cursor_for_keyless_tables() {
        let log = TableDescriptor::new(QualifiedName::new("HR", "AUDIT_LOG"));
        let source = MemorySource::new().with_table(&log, (1..=5).map(row).collect());

        let rows = source
            .read_batch(&log, &Cursor::Offset { rows: 4 }, 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn injected_transient_fault_fires_then_clears() {
        let source = MemorySource::new().with_table(&jobs(), vec![row(1)]);
        source
            .inject(&jobs().name, FaultPlan::new(Fault::Transient).times(1))
            .await;

        let err = source.read_batch(&jobs(), &Cursor::Start, 10).await.unwrap_err();
        assert!(err.is_transient());
        assert!(source.read_batch(&jobs(), &Cursor::Start, 10).await.is_ok());
        assert_eq!(source.read_log().await.len(), 2);
    }

    #[tokio::test]
    async fn unknown_table_is_a_schema_mismatch() {
        let source = MemorySource::new();
        let err = source.read_batch(&jobs(), &Cursor::Start, 10).await.unwrap_err();
        assert!(matches!(err, ExtractError::SchemaMismatch { .. }));
    }
}
