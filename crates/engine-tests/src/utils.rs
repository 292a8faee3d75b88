use connectors::memory::{MemoryDestination, MemorySource};
use engine_runtime::{Connections, RunHandle, RunReport, RunState, start_run};
use model::{
    catalog::table::TableDescriptor,
    config::{ConflictPolicy, MigrationConfig, TransactionMode},
    core::identifiers::QualifiedName,
    records::row::{FieldValue, RowData},
};
use planner::{MigrationPlan, build_plan};
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;

/// Upper bound for any single run in these tests.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(30);

pub fn name(s: &str) -> QualifiedName {
    s.parse().expect("valid qualified name")
}

/// Settings with tiny retry delays so failure scenarios finish quickly.
pub fn fast_config(batch_size: usize, max_parallel: usize) -> MigrationConfig {
    MigrationConfig {
        batch_size,
        max_parallel,
        conflict_policy: ConflictPolicy::Fail,
        transaction_mode: TransactionMode::PerTable,
        max_retries: 3,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        batch_timeout_ms: 5_000,
        idle_attempt_limit: 3,
    }
}

/// HR.DEPARTMENTS (27 rows) referenced by HR.EMPLOYEES (107 rows).
pub fn departments_and_employees() -> Vec<TableDescriptor> {
    vec![
        TableDescriptor::new(name("HR.DEPARTMENTS"))
            .with_primary_key(["DEPARTMENT_ID"])
            .with_estimated_rows(27),
        TableDescriptor::new(name("HR.EMPLOYEES"))
            .with_primary_key(["EMPLOYEE_ID"])
            .with_foreign_key("DEPARTMENT_ID", name("HR.DEPARTMENTS"), "DEPARTMENT_ID")
            .with_estimated_rows(107),
    ]
}

/// S.A and S.B referencing each other.
pub fn cyclic_pair(rows: u64) -> Vec<TableDescriptor> {
    vec![
        TableDescriptor::new(name("S.A"))
            .with_primary_key(["ID"])
            .with_foreign_key("B_ID", name("S.B"), "ID")
            .with_estimated_rows(rows),
        TableDescriptor::new(name("S.B"))
            .with_primary_key(["ID"])
            .with_foreign_key("A_ID", name("S.A"), "ID")
            .with_estimated_rows(rows),
    ]
}

/// The same tables with every foreign key removed.
pub fn without_foreign_keys(catalog: &[TableDescriptor]) -> Vec<TableDescriptor> {
    catalog
        .iter()
        .cloned()
        .map(|mut t| {
            t.foreign_keys.clear();
            t
        })
        .collect()
}

pub fn id_rows(column: &str, ids: impl IntoIterator<Item = i64>) -> Vec<RowData> {
    ids.into_iter()
        .map(|id| RowData::new(vec![FieldValue::new(column, id)]))
        .collect()
}

/// Source and destination built from the same catalog.
pub struct Harness {
    pub catalog: Vec<TableDescriptor>,
    pub source: Arc<MemorySource>,
    pub destination: MemoryDestination,
}

impl Harness {
    pub fn new(catalog: Vec<TableDescriptor>) -> Self {
        Self {
            source: Arc::new(MemorySource::from_catalog(&catalog)),
            destination: MemoryDestination::from_catalog(&catalog),
            catalog,
        }
    }

    pub fn with_source(mut self, source: MemorySource) -> Self {
        self.source = Arc::new(source);
        self
    }

    pub fn with_destination(mut self, destination: MemoryDestination) -> Self {
        self.destination = destination;
        self
    }

    pub fn plan(&self, config: &MigrationConfig) -> MigrationPlan {
        build_plan(&self.catalog, config).expect("plan builds")
    }

    pub fn connections(&self) -> Connections {
        Connections::new(self.source.clone(), Arc::new(self.destination.clone()))
    }

    pub fn start(&self, config: &MigrationConfig) -> RunHandle {
        start_run(self.plan(config), self.connections())
    }

    /// Runs to completion, panicking if the run hangs.
    pub async fn run(&self, config: &MigrationConfig) -> RunReport {
        finish(self.start(config)).await
    }

    pub async fn destination_rows(&self, table: &str) -> usize {
        self.destination.rows(&name(table)).await.len()
    }
}

pub async fn finish(handle: RunHandle) -> RunReport {
    timeout(RUN_TIMEOUT, handle.wait())
        .await
        .expect("run finished in time")
        .expect("scheduler task completed")
}

/// Waits until a published run state satisfies `predicate`.
pub async fn wait_for_state(handle: &RunHandle, predicate: impl Fn(&RunState) -> bool) -> RunState {
    let mut rx = handle.subscribe();
    timeout(RUN_TIMEOUT, async {
        loop {
            {
                let state = rx.borrow_and_update();
                if predicate(&*state) {
                    return (*state).clone();
                }
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    })
    .await
    .expect("state reached in time")
}

/// Index of the first run log entry containing `needle`.
pub fn log_position(report: &RunReport, needle: &str) -> Option<usize> {
    report.log.iter().position(|e| e.message.contains(needle))
}
