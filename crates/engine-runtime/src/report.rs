use crate::state::RunState;
use chrono::{DateTime, Utc};
use engine_core::metrics::MetricsSnapshot;
use model::{
    core::identifiers::{QualifiedName, RunId},
    execution::{
        failure::FailureReport,
        log::RunLog,
        status::{RunStatus, TableStatus},
    },
};
use planner::MigrationPlan;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReport {
    pub table: QualifiedName,
    pub destination: QualifiedName,
    pub level: usize,
    pub status: TableStatus,
    pub rows_copied: u64,
    pub estimated_rows: u64,
    pub duration: Duration,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureReport>,
    /// For a failed table: dependents that were still loaded. Failures do not
    /// cascade, so these may hold rows pointing at missing parents.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependents_loaded: Vec<QualifiedName>,
}

/// Final outcome of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: RunId,
    pub plan_hash: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    pub rows_copied: u64,
    pub tables: Vec<TableReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cycles: Vec<Vec<QualifiedName>>,
    pub metrics: MetricsSnapshot,
    pub log: RunLog,
}

impl RunReport {
    pub fn build(plan: &MigrationPlan, state: &RunState, metrics: MetricsSnapshot) -> Self {
        let tables = plan
            .levels
            .iter()
            .flat_map(|level| level.tables.iter())
            .filter_map(|name| state.table(name))
            .map(|table| {
                let dependents_loaded = if table.status == TableStatus::Failed {
                    plan.dependents_of(&table.table)
                        .into_iter()
                        .filter(|dep| {
                            state
                                .table(dep)
                                .is_some_and(|t| t.status == TableStatus::Completed)
                        })
                        .collect()
                } else {
                    Vec::new()
                };

                TableReport {
                    table: table.table.clone(),
                    destination: table.destination.clone(),
                    level: table.level,
                    status: table.status,
                    rows_copied: table.rows_copied,
                    estimated_rows: table.total_rows,
                    duration: table.elapsed,
                    retries: table.retries,
                    error: table.last_error.clone(),
                    dependents_loaded,
                }
            })
            .collect();

        Self {
            run_id: state.run_id.clone(),
            plan_hash: plan.fingerprint().to_string(),
            status: state.status,
            started_at: state.started_at,
            finished_at: Utc::now(),
            duration: state.elapsed,
            rows_copied: state.rows_copied,
            tables,
            cycles: plan.cycles.clone(),
            metrics,
            log: state.log.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn table(&self, name: &QualifiedName) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == *name)
    }

    pub fn failed_tables(&self) -> impl Iterator<Item = &TableReport> {
        self.tables
            .iter()
            .filter(|t| t.status == TableStatus::Failed)
    }
}
