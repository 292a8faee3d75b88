use crate::{handle::Connections, report::RunReport, state::RunState};
use engine_core::{
    control::RunControl,
    error::TableError,
    metrics::Metrics,
    retry::{RetryPolicy, classify_load_error},
};
use engine_processing::worker::{TableWorker, WorkerContext};
use futures::FutureExt;
use model::{
    core::identifiers::QualifiedName,
    events::TableEvent,
    execution::{
        log::LogLevel,
        status::{RunStatus, TableRunState, TableStatus},
    },
};
use planner::{MigrationPlan, PlanLevel};
use std::{
    collections::{HashMap, VecDeque},
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::{mpsc, watch},
    task::{self, JoinError, JoinSet},
    time::{MissedTickBehavior, interval},
};
use tracing::{error, info, warn};

const EVENT_BUFFER: usize = 1024;
const REFRESH_INTERVAL: Duration = Duration::from_millis(250);

/// Outcome of one worker task: the final snapshot, or the panic message.
type Joined = (QualifiedName, Result<TableRunState, String>);

/// Walks the plan level by level with at most `max_parallel` workers.
///
/// The next level is only dispatched once every table of the current one is
/// terminal. A failed table never stops its siblings or later levels.
pub struct Scheduler {
    plan: Arc<MigrationPlan>,
    connections: Connections,
    control: RunControl,
    metrics: Metrics,
    state: RunState,
    publisher: watch::Sender<RunState>,
    events_tx: mpsc::Sender<TableEvent>,
    events_rx: mpsc::Receiver<TableEvent>,
    tasks: HashMap<task::Id, QualifiedName>,
    started: Instant,
}

impl Scheduler {
    pub fn new(
        plan: Arc<MigrationPlan>,
        connections: Connections,
        control: RunControl,
        state: RunState,
        publisher: watch::Sender<RunState>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            plan,
            connections,
            control,
            metrics: Metrics::new(),
            state,
            publisher,
            events_tx,
            events_rx,
            tasks: HashMap::new(),
            started: Instant::now(),
        }
    }

    pub async fn run(mut self) -> RunReport {
        self.started = Instant::now();
        self.state.status = RunStatus::Running;
        info!(
            run_id = %self.state.run_id,
            tables = self.plan.table_count(),
            levels = self.plan.levels.len(),
            "Migration started"
        );
        self.log(LogLevel::Info, None, "Migration started");

        let plan = Arc::clone(&self.plan);
        for cycle in &plan.cycles {
            let members = cycle
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            self.log(
                LogLevel::Warn,
                None,
                format!("Foreign-key cycle between {members}; constraints deferred until all levels finish"),
            );
        }

        self.suspend_deferred_constraints().await;

        for level in &plan.levels {
            if self.control.is_cancelled() {
                break;
            }
            self.run_level(level).await;
        }

        if self.control.is_cancelled() {
            self.state.cancel_pending(self.started.elapsed());
        } else {
            self.restore_deferred_constraints().await;
        }

        self.state.current_level = None;
        self.state.recompute(self.started.elapsed());
        self.state.status = if self.control.is_cancelled() {
            RunStatus::Cancelled
        } else if self.state.has_failures() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        let summary = format!(
            "Migration {}: {} rows copied in {:.2}s",
            self.state.status,
            self.state.rows_copied,
            self.started.elapsed().as_secs_f64()
        );
        let level = match self.state.status {
            RunStatus::Completed => LogLevel::Info,
            RunStatus::Cancelled => LogLevel::Warn,
            _ => LogLevel::Error,
        };
        info!(run_id = %self.state.run_id, status = %self.state.status, rows = self.state.rows_copied, "Migration finished");
        self.log(level, None, summary);

        RunReport::build(&self.plan, &self.state, self.metrics.snapshot())
    }

    async fn run_level(&mut self, level: &PlanLevel) {
        self.state.current_level = Some(level.index);
        let names = level
            .tables
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        info!(level = level.index, tables = %names, "Dispatching level");
        self.log(
            LogLevel::Info,
            None,
            format!("Level {} started: {names}", level.index),
        );

        // Tables already failed during setup are not dispatched.
        let mut queue: VecDeque<QualifiedName> = level
            .tables
            .iter()
            .filter(|name| {
                self.state
                    .table(name)
                    .is_some_and(|t| t.status == TableStatus::Queued)
            })
            .cloned()
            .collect();

        let max_parallel = self.plan.settings.max_parallel.max(1);
        let mut running: JoinSet<Joined> = JoinSet::new();
        let mut paused = self.control.subscribe_pause();
        let initially_paused = *paused.borrow_and_update();
        self.on_pause_changed(initially_paused);
        let cancel = self.control.token();
        let mut cancel_seen = false;
        let mut refresh = interval(REFRESH_INTERVAL);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            while running.len() < max_parallel
                && !self.control.is_paused()
                && !self.control.is_cancelled()
            {
                let Some(name) = queue.pop_front() else {
                    break;
                };
                self.dispatch(&mut running, name, level.index);
            }

            if running.is_empty() && (queue.is_empty() || self.control.is_cancelled()) {
                break;
            }

            tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    self.state.apply(&event, self.started.elapsed());
                    self.publish();
                }
                Some(joined) = running.join_next_with_id() => {
                    self.settle(joined);
                }
                Ok(()) = paused.changed() => {
                    let is_paused = *paused.borrow_and_update();
                    self.on_pause_changed(is_paused);
                }
                _ = cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    warn!(run_id = %self.state.run_id, "Cancellation requested");
                    self.log(LogLevel::Warn, None, "Migration cancelled; stopping at the next batch boundary");
                }
                _ = refresh.tick() => {
                    self.state.recompute(self.started.elapsed());
                    self.publish();
                }
            }
        }

        // Workers send their last event before returning, so it is queued by now.
        while let Ok(event) = self.events_rx.try_recv() {
            self.state.apply(&event, self.started.elapsed());
        }
        self.publish();
    }

    fn dispatch(&mut self, running: &mut JoinSet<Joined>, name: QualifiedName, level: usize) {
        let Some(descriptor) = self.plan.table(&name).cloned() else {
            return;
        };

        let ctx = WorkerContext {
            settings: self.plan.settings.clone(),
            source: Arc::clone(&self.connections.source),
            destination: Arc::clone(&self.connections.destination),
            control: self.control.clone(),
            metrics: self.metrics.clone(),
            events: self.events_tx.clone(),
        };

        if let Some(table) = self.state.tables.get_mut(&name) {
            table.status = TableStatus::Running;
        }
        let table_name = name.clone();

        let worker = running.spawn(async move {
            let outcome = AssertUnwindSafe(TableWorker::new(ctx, descriptor, level).run())
                .catch_unwind()
                .await
                .map_err(|panic| {
                    panic
                        .downcast_ref::<&str>()
                        .map(ToString::to_string)
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "worker panicked".to_string())
                });
            (name, outcome)
        });
        self.tasks.insert(worker.id(), table_name);
    }

    fn settle(&mut self, joined: Result<(task::Id, Joined), JoinError>) {
        let elapsed = self.started.elapsed();
        match joined {
            Ok((id, (_, Ok(snapshot)))) => {
                self.tasks.remove(&id);
                self.state.settle(snapshot, elapsed);
            }
            Ok((id, (name, Err(panic)))) => {
                self.tasks.remove(&id);
                error!(table = %name, panic = %panic, "Table worker panicked");
                self.fail_worker(name, panic);
            }
            Err(err) => match self.tasks.remove(&err.id()) {
                Some(name) => {
                    error!(table = %name, error = %err, "Table worker task aborted");
                    self.fail_worker(name, err.to_string());
                }
                None => error!(error = %err, "Untracked worker task aborted"),
            },
        }
        self.publish();
    }

    /// A worker that never returned a snapshot fails its table.
    fn fail_worker(&mut self, table: QualifiedName, cause: String) {
        self.metrics.increment_failures();
        let report = TableError::Internal { table, cause }.to_report(1);
        self.state.fail_table(report, self.started.elapsed());
    }

    fn on_pause_changed(&mut self, is_paused: bool) {
        if self.state.status.is_terminal() {
            return;
        }

        if is_paused && self.state.status != RunStatus::Paused {
            info!(run_id = %self.state.run_id, "Migration paused");
            self.state.status = RunStatus::Paused;
            self.log(LogLevel::Warn, None, "Migration paused");
        } else if !is_paused && self.state.status == RunStatus::Paused {
            info!(run_id = %self.state.run_id, "Migration resumed");
            self.state.status = RunStatus::Running;
            self.log(LogLevel::Info, None, "Migration resumed");
        }
    }

    async fn suspend_deferred_constraints(&mut self) {
        let destination = Arc::clone(&self.connections.destination);
        for name in self.plan.deferred_constraints.clone() {
            let Some(target) = self.plan.table(&name).map(|t| t.destination_name()) else {
                continue;
            };

            match destination.suspend_foreign_keys(&target).await {
                Ok(()) => {
                    info!(table = %name, "Foreign keys suspended until load completes");
                    self.log(
                        LogLevel::Info,
                        Some(&name),
                        format!("Deferred foreign keys of {target}"),
                    );
                }
                Err(err) => {
                    error!(table = %name, error = %err, "Failed to suspend foreign keys");
                    self.metrics.increment_failures();
                    let mut report = TableError::from_load(err, 0, 1).to_report(1);
                    report.table = name.clone();
                    report.batch_index = None;
                    self.state.fail_table(report, self.started.elapsed());
                }
            }
        }
        self.publish();
    }

    async fn restore_deferred_constraints(&mut self) {
        let destination = Arc::clone(&self.connections.destination);
        let policy = RetryPolicy::from_config(&self.plan.settings);

        for name in self.plan.deferred_constraints.clone() {
            let Some(target) = self.plan.table(&name).map(|t| t.destination_name()) else {
                continue;
            };

            let completed = self
                .state
                .table(&name)
                .is_some_and(|t| t.status == TableStatus::Completed);
            if !completed {
                warn!(table = %name, "Table did not complete; its foreign keys stay suspended");
                self.log(
                    LogLevel::Warn,
                    Some(&name),
                    format!("Foreign keys of {target} left suspended"),
                );
                continue;
            }

            let restored = policy
                .run(
                    || destination.restore_foreign_keys(&target),
                    classify_load_error,
                )
                .await;

            match restored {
                Ok(()) => {
                    info!(table = %name, "Deferred foreign keys restored");
                    self.log(
                        LogLevel::Info,
                        Some(&name),
                        format!("Restored foreign keys of {target}"),
                    );
                }
                Err(err) => {
                    let error = match err.into_inner() {
                        connectors::error::LoadError::Constraint {
                            table,
                            message,
                            offending_rows,
                        } => TableError::DeferredConstraint {
                            table,
                            cause: message,
                            offending_rows,
                        },
                        other => TableError::DeferredConstraint {
                            table: other.table().clone(),
                            cause: other.to_string(),
                            offending_rows: Vec::new(),
                        },
                    };
                    self.metrics.increment_failures();
                    let mut report = error.to_report(1);
                    report.table = name.clone();
                    self.state.fail_table(report, self.started.elapsed());
                }
            }
        }
        self.publish();
    }

    fn log(&mut self, level: LogLevel, table: Option<&QualifiedName>, message: impl Into<String>) {
        self.state.push_log(level, table, message);
        self.publish();
    }

    fn publish(&self) {
        self.publisher.send_replace(self.state.clone());
    }
}
