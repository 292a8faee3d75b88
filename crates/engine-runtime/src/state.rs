use chrono::{DateTime, Utc};
use model::{
    core::identifiers::{QualifiedName, RunId},
    events::{TableEvent, TableEventKind},
    execution::{
        failure::FailureReport,
        log::{LogEntry, LogLevel, RunLog},
        status::{RunStatus, TableRunState, TableStatus},
    },
};
use planner::MigrationPlan;
use serde::Serialize;
use std::{collections::BTreeMap, time::Duration};

/// Aggregate view of one run.
///
/// Only the scheduler mutates it, one event at a time; callers get clones.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub run_id: RunId,
    pub status: RunStatus,
    pub current_level: Option<usize>,
    pub level_count: usize,
    pub tables: BTreeMap<QualifiedName, TableRunState>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub rows_copied: u64,
    /// Estimated rows, with finished tables counted at their actual size.
    pub total_rows: u64,
    pub rows_per_second: f64,
    pub progress: f64,
    pub eta: Option<Duration>,
    pub log: RunLog,
}

impl RunState {
    pub fn new(run_id: RunId, plan: &MigrationPlan) -> Self {
        let tables: BTreeMap<QualifiedName, TableRunState> = plan
            .levels
            .iter()
            .flat_map(|level| {
                level.tables.iter().filter_map(move |name| {
                    plan.table(name)
                        .map(|descriptor| (name.clone(), TableRunState::queued(descriptor, level.index)))
                })
            })
            .collect();

        let mut state = Self {
            run_id,
            status: RunStatus::Pending,
            current_level: None,
            level_count: plan.levels.len(),
            tables,
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            rows_copied: 0,
            total_rows: 0,
            rows_per_second: 0.0,
            progress: 0.0,
            eta: None,
            log: RunLog::new(),
        };
        state.recompute(Duration::ZERO);
        state
    }

    pub fn table(&self, name: &QualifiedName) -> Option<&TableRunState> {
        self.tables.get(name)
    }

    pub fn tables_with_status(&self, status: TableStatus) -> impl Iterator<Item = &TableRunState> {
        self.tables.values().filter(move |t| t.status == status)
    }

    pub fn has_failures(&self) -> bool {
        self.tables_with_status(TableStatus::Failed).next().is_some()
    }

    /// Run log entries, optionally only those at `level`.
    pub fn log_entries(&self, level: Option<LogLevel>) -> Vec<&LogEntry> {
        self.log.filter(level)
    }

    pub fn push_log(
        &mut self,
        level: LogLevel,
        table: Option<&QualifiedName>,
        message: impl Into<String>,
    ) {
        self.log.push(LogEntry::new(level, table.cloned(), message));
    }

    /// Folds one worker event into the aggregate.
    pub fn apply(&mut self, event: &TableEvent, elapsed: Duration) {
        let snapshot = &event.snapshot;
        let table = &snapshot.table;

        match &event.kind {
            TableEventKind::Started => {
                self.push_log(LogLevel::Info, Some(table), format!("Started migrating {table}"));
            }
            TableEventKind::BatchCommitted { .. } => {}
            TableEventKind::RetryScheduled {
                attempt,
                delay,
                error,
            } => {
                self.push_log(
                    LogLevel::Warn,
                    Some(table),
                    format!(
                        "Retry {attempt} for {table} in {} ms: {error}",
                        delay.as_millis()
                    ),
                );
            }
            TableEventKind::RolledBack { rows_discarded } => {
                self.push_log(
                    LogLevel::Warn,
                    Some(table),
                    format!("Rolled back {rows_discarded} uncommitted rows of {table}"),
                );
            }
            TableEventKind::Skipped { existing_rows } => {
                self.push_log(
                    LogLevel::Info,
                    Some(table),
                    format!("Skipped {table}: destination already holds {existing_rows} rows"),
                );
            }
            TableEventKind::EstimateMismatch { estimated, copied } => {
                self.push_log(
                    LogLevel::Warn,
                    Some(table),
                    format!("Copied {copied} rows of {table}, catalog estimated {estimated}"),
                );
            }
            TableEventKind::Completed => {
                self.push_log(
                    LogLevel::Info,
                    Some(table),
                    format!(
                        "Migrated {table}: {} rows in {:.2}s",
                        snapshot.rows_copied,
                        snapshot.elapsed.as_secs_f64()
                    ),
                );
            }
            TableEventKind::Failed => {
                let reason = snapshot
                    .last_error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "unknown error".into());
                self.push_log(
                    LogLevel::Error,
                    Some(table),
                    format!("Failed to migrate {table}: {reason}"),
                );
            }
            TableEventKind::Cancelled => {
                self.push_log(
                    LogLevel::Warn,
                    Some(table),
                    format!("Cancelled {table} after {} rows", snapshot.rows_copied),
                );
            }
        }

        // The worker's join may be settled before its last events are drained.
        let settled = self
            .tables
            .get(table)
            .is_some_and(TableRunState::is_terminal);
        if settled && !snapshot.is_terminal() {
            self.recompute(elapsed);
        } else {
            self.replace_snapshot(snapshot.clone(), elapsed);
        }
    }

    /// Installs a worker's final snapshot, unless a terminal one is already there.
    pub fn settle(&mut self, snapshot: TableRunState, elapsed: Duration) {
        let settled = self
            .tables
            .get(&snapshot.table)
            .is_some_and(TableRunState::is_terminal);
        if !settled {
            self.replace_snapshot(snapshot, elapsed);
        }
    }

    /// Marks a table failed without a worker snapshot (panic, setup error).
    pub fn fail_table(&mut self, report: FailureReport, elapsed: Duration) {
        let name = report.table.clone();
        self.push_log(
            LogLevel::Error,
            Some(&name),
            format!("Failed to migrate {name}: {report}"),
        );
        if let Some(table) = self.tables.get_mut(&name) {
            table.status = TableStatus::Failed;
            table.last_error = Some(report);
        }
        self.recompute(elapsed);
    }

    /// Marks every table that never reached a terminal state as cancelled.
    pub fn cancel_pending(&mut self, elapsed: Duration) {
        for table in self.tables.values_mut() {
            if !table.is_terminal() {
                table.status = TableStatus::Cancelled;
            }
        }
        self.recompute(elapsed);
    }

    fn replace_snapshot(&mut self, snapshot: TableRunState, elapsed: Duration) {
        self.tables.insert(snapshot.table.clone(), snapshot);
        self.recompute(elapsed);
    }

    /// Recomputes totals, throughput, progress and ETA.
    pub fn recompute(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
        self.rows_copied = self.tables.values().map(|t| t.rows_copied).sum();
        self.total_rows = self
            .tables
            .values()
            .map(|t| match t.status {
                TableStatus::Completed => t.rows_copied,
                _ => t.total_rows.max(t.rows_copied),
            })
            .sum();

        let secs = elapsed.as_secs_f64();
        self.rows_per_second = if secs > 0.0 {
            self.rows_copied as f64 / secs
        } else {
            0.0
        };

        self.progress = if self.total_rows == 0 {
            if self.tables.values().all(TableRunState::is_terminal) {
                1.0
            } else {
                0.0
            }
        } else {
            (self.rows_copied as f64 / self.total_rows as f64).clamp(0.0, 1.0)
        };

        let remaining = self.total_rows.saturating_sub(self.rows_copied);
        self.eta = if remaining == 0 {
            Some(Duration::ZERO)
        } else if self.rows_per_second > 0.0 {
            Some(Duration::from_secs_f64(
                (remaining as f64 / self.rows_per_second).max(0.0),
            ))
        } else {
            None
        };
    }
}
