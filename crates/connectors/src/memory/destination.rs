use crate::{
    destination::{Destination, DestinationTx},
    error::LoadError,
    memory::fault::{Fault, FaultPlan},
};
use async_trait::async_trait;
use model::{
    catalog::table::{ForeignKey, TableDescriptor},
    core::{identifiers::QualifiedName, value::Value},
    records::row::RowData,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::debug;

struct StoredTable {
    primary_key: Vec<String>,
    foreign_keys: Vec<ForeignKey>,
    rows: Vec<RowData>,
    enforce_foreign_keys: bool,
}

#[derive(Default)]
struct Store {
    tables: BTreeMap<QualifiedName, StoredTable>,
    faults: HashMap<QualifiedName, FaultPlan>,
    commits: Vec<QualifiedName>,
}

impl Store {
    fn table(&self, name: &QualifiedName) -> Result<&StoredTable, LoadError> {
        self.tables
            .get(name)
            .ok_or_else(|| LoadError::SchemaMismatch {
                table: name.clone(),
                message: "table does not exist in the destination".into(),
            })
    }

    /// Positions in `rows` whose primary key is already taken by committed
    /// rows, `staged` or an earlier row of the same batch.
    fn key_violations(
        &self,
        name: &QualifiedName,
        staged: &[RowData],
        rows: &[RowData],
    ) -> Result<Vec<(usize, String)>, LoadError> {
        let table = self.table(name)?;
        let mut offending = Vec::new();
        if table.primary_key.is_empty() {
            return Ok(offending);
        }

        let mut seen: Vec<Vec<Value>> = table
            .rows
            .iter()
            .chain(staged)
            .filter_map(|r| r.key(&table.primary_key))
            .collect();

        for (i, row) in rows.iter().enumerate() {
            let Some(key) = row.key(&table.primary_key) else {
                return Err(LoadError::SchemaMismatch {
                    table: name.clone(),
                    message: format!(
                        "row {i} lacks primary key columns ({})",
                        table.primary_key.join(", ")
                    ),
                });
            };
            if seen.contains(&key) {
                offending.push((i, format!("duplicate primary key {key:?}")));
            } else {
                seen.push(key);
            }
        }

        Ok(offending)
    }

    /// Positions in `rows` referencing parent rows that do not exist.
    fn foreign_key_violations(
        &self,
        name: &QualifiedName,
        staged: &[RowData],
        rows: &[RowData],
    ) -> Result<Vec<(usize, String)>, LoadError> {
        let table = self.table(name)?;
        let mut offending = Vec::new();
        if !table.enforce_foreign_keys {
            return Ok(offending);
        }

        for fk in &table.foreign_keys {
            let parent_rows: Vec<&RowData> = if fk.references == *name {
                table.rows.iter().chain(staged).chain(rows).collect()
            } else {
                self.table(&fk.references)?.rows.iter().collect()
            };

            for (i, row) in rows.iter().enumerate() {
                if !references_exist(row, fk, &parent_rows) {
                    let reason = format!("{} -> {}", fk.columns.join(","), fk.references);
                    offending.push((i, reason));
                }
            }
        }

        Ok(offending)
    }

    fn violations(
        &self,
        name: &QualifiedName,
        staged: &[RowData],
        rows: &[RowData],
    ) -> Result<Vec<(usize, String)>, LoadError> {
        let mut offending = self.key_violations(name, staged, rows)?;
        offending.extend(self.foreign_key_violations(name, staged, rows)?);
        offending.sort_by_key(|(i, _)| *i);
        offending.dedup_by_key(|(i, _)| *i);
        Ok(offending)
    }
}

fn references_exist(row: &RowData, fk: &ForeignKey, parents: &[&RowData]) -> bool {
    let values: Vec<Value> = fk.columns.iter().map(|c| row.get_value(c)).collect();
    if values.iter().any(Value::is_null) {
        return true;
    }
    parents
        .iter()
        .any(|parent| parent.key(&fk.referenced_columns).as_ref() == Some(&values))
}

fn constraint_error(table: &QualifiedName, offending: Vec<(usize, String)>) -> LoadError {
    let first = offending
        .first()
        .map(|(i, reason)| format!("row {i}: {reason}"))
        .unwrap_or_default();
    LoadError::Constraint {
        table: table.clone(),
        message: format!("{} row(s) rejected, first {first}", offending.len()),
        offending_rows: offending.into_iter().map(|(i, _)| i).collect(),
    }
}

/// Destination tables held in memory that enforce primary and foreign keys.
#[derive(Clone, Default)]
pub struct MemoryDestination {
    store: Arc<Mutex<Store>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty destination table for every catalog entry, under its
    /// destination name and with foreign keys pointing at destination names.
    pub fn from_catalog(catalog: &[TableDescriptor]) -> Self {
        let renamed: HashMap<&QualifiedName, QualifiedName> = catalog
            .iter()
            .map(|t| (&t.name, t.destination_name()))
            .collect();

        let tables = catalog
            .iter()
            .map(|t| {
                let foreign_keys = t
                    .foreign_keys
                    .iter()
                    .map(|fk| ForeignKey {
                        references: renamed
                            .get(&fk.references)
                            .cloned()
                            .unwrap_or_else(|| fk.references.clone()),
                        ..fk.clone()
                    })
                    .collect();

                let stored = StoredTable {
                    primary_key: t.primary_key.clone(),
                    foreign_keys,
                    rows: Vec::new(),
                    enforce_foreign_keys: true,
                };
                (t.destination_name(), stored)
            })
            .collect();

        Self {
            store: Arc::new(Mutex::new(Store {
                tables,
                ..Default::default()
            })),
        }
    }

    /// Places rows directly, bypassing constraints.
    pub async fn seed(&self, table: &QualifiedName, rows: Vec<RowData>) {
        if let Some(stored) = self.store.lock().await.tables.get_mut(table) {
            stored.rows.extend(rows);
        }
    }

    pub async fn rows(&self, table: &QualifiedName) -> Vec<RowData> {
        self.store
            .lock()
            .await
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub async fn foreign_keys_enforced(&self, table: &QualifiedName) -> bool {
        self.store
            .lock()
            .await
            .tables
            .get(table)
            .is_some_and(|t| t.enforce_foreign_keys)
    }

    /// Committed transactions, in commit order.
    pub async fn commit_log(&self) -> Vec<QualifiedName> {
        self.store.lock().await.commits.clone()
    }

    pub async fn inject(&self, table: &QualifiedName, plan: FaultPlan) {
        self.store.lock().await.faults.insert(table.clone(), plan);
    }

    pub async fn clear_faults(&self) {
        self.store.lock().await.faults.clear();
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn row_count(&self, table: &QualifiedName) -> Result<u64, LoadError> {
        let store = self.store.lock().await;
        Ok(store.table(table)?.rows.len() as u64)
    }

    async fn truncate(&self, table: &QualifiedName) -> Result<(), LoadError> {
        let mut store = self.store.lock().await;
        store.table(table)?;
        if let Some(stored) = store.tables.get_mut(table) {
            debug!(table = %table, rows = stored.rows.len(), "Truncating destination table");
            stored.rows.clear();
        }
        Ok(())
    }

    async fn begin(&self, table: &QualifiedName) -> Result<Box<dyn DestinationTx>, LoadError> {
        self.store.lock().await.table(table)?;
        Ok(Box::new(MemoryTx {
            store: Arc::clone(&self.store),
            table: table.clone(),
            staged: Vec::new(),
        }))
    }

    async fn suspend_foreign_keys(&self, table: &QualifiedName) -> Result<(), LoadError> {
        let mut store = self.store.lock().await;
        store.table(table)?;
        if let Some(stored) = store.tables.get_mut(table) {
            stored.enforce_foreign_keys = false;
        }
        Ok(())
    }

    async fn restore_foreign_keys(&self, table: &QualifiedName) -> Result<(), LoadError> {
        let mut store = self.store.lock().await;
        let rows = store.table(table)?.rows.clone();

        if let Some(stored) = store.tables.get_mut(table) {
            stored.enforce_foreign_keys = true;
        }

        let offending = store.foreign_key_violations(table, &[], &rows)?;

        if offending.is_empty() {
            Ok(())
        } else {
            if let Some(stored) = store.tables.get_mut(table) {
                stored.enforce_foreign_keys = false;
            }
            Err(constraint_error(table, offending))
        }
    }
}

struct MemoryTx {
    store: Arc<Mutex<Store>>,
    table: QualifiedName,
    staged: Vec<RowData>,
}

#[async_trait]
impl DestinationTx for MemoryTx {
    async fn insert(&mut self, rows: &[RowData]) -> Result<u64, LoadError> {
        let fault = self
            .store
            .lock()
            .await
            .faults
            .get_mut(&self.table)
            .and_then(FaultPlan::next);

        match fault {
            Some(Fault::Transient) => {
                return Err(LoadError::Transient {
                    table: self.table.clone(),
                    message: "lock request time out period exceeded".into(),
                });
            }
            Some(Fault::Constraint) => {
                return Err(LoadError::Constraint {
                    table: self.table.clone(),
                    message: "injected constraint violation".into(),
                    offending_rows: vec![0],
                });
            }
            Some(Fault::SchemaMismatch) => {
                return Err(LoadError::SchemaMismatch {
                    table: self.table.clone(),
                    message: "invalid column name".into(),
                });
            }
            Some(Fault::Delay(delay)) => tokio::time::sleep(delay).await,
            None => {}
        }

        let store = self.store.lock().await;
        let offending = store.violations(&self.table, &self.staged, rows)?;
        if !offending.is_empty() {
            return Err(constraint_error(&self.table, offending));
        }
        drop(store);

        self.staged.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), LoadError> {
        let MemoryTx {
            store,
            table,
            staged,
        } = *self;
        let mut store = store.lock().await;

        let Some(stored) = store.tables.get_mut(&table) else {
            return Err(LoadError::SchemaMismatch {
                table,
                message: "table dropped during transaction".into(),
            });
        };
        stored.rows.extend(staged);
        store.commits.push(table);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LoadError> {
        debug!(table = %self.table, rows = self.staged.len(), "Rolled back destination transaction");
        Ok(())
    }
}
