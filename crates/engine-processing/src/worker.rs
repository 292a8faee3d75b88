use crate::{
    budget::{BudgetState, RetryBudget},
    extractor::BatchExtractor,
    loader::{BatchLoader, Preparation},
};
use connectors::{
    destination::Destination,
    error::{ExtractError, LoadError},
    source::RowSource,
};
use engine_core::{control::RunControl, error::TableError, metrics::Metrics, retry::RetryPolicy};
use model::{
    catalog::table::TableDescriptor,
    config::MigrationConfig,
    events::{TableEvent, TableEventKind},
    execution::status::{TableRunState, TableStatus},
    pagination::cursor::Cursor,
    records::batch::Batch,
};
use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Bounds one extractor read or loader write. `None` means it timed out.
async fn timed<T>(limit: Option<Duration>, fut: impl Future<Output = T>) -> Option<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Everything a worker needs besides its table.
#[derive(Clone)]
pub struct WorkerContext {
    pub settings: MigrationConfig,
    pub source: Arc<dyn RowSource>,
    pub destination: Arc<dyn Destination>,
    pub control: RunControl,
    pub metrics: Metrics,
    pub events: mpsc::Sender<TableEvent>,
}

enum Step {
    Continue,
    Exhausted,
    Skipped { existing_rows: u64 },
}

enum StepError {
    /// Retryable; counts against the retry budget.
    Transient { cause: String, error: TableError },
    /// An attempt exceeded the batch timeout.
    TimedOut,
    Fatal(TableError),
}

impl StepError {
    fn extract(err: ExtractError, batch_index: u64, attempts: u32) -> Self {
        let cause = err.to_string();
        let transient = err.is_transient();
        let error = TableError::from_extract(err, batch_index, attempts);
        if transient {
            StepError::Transient { cause, error }
        } else {
            StepError::Fatal(error)
        }
    }

    fn load(err: LoadError, batch_index: u64, attempts: u32) -> Self {
        let cause = err.to_string();
        let transient = err.is_transient();
        let error = TableError::from_load(err, batch_index, attempts);
        if transient {
            StepError::Transient { cause, error }
        } else {
            StepError::Fatal(error)
        }
    }
}

/// Drives extractor -> loader for one table, start to finish.
///
/// The worker exclusively owns its [`TableRunState`]; the scheduler only sees
/// the snapshots pushed with each [`TableEvent`].
pub struct TableWorker {
    ctx: WorkerContext,
    table: TableDescriptor,
    state: TableRunState,
    extractor: BatchExtractor,
    loader: BatchLoader,
    budget: RetryBudget,
    pending: Option<Batch>,
    started: Instant,
}

impl TableWorker {
    pub fn new(ctx: WorkerContext, table: TableDescriptor, level: usize) -> Self {
        let extractor = BatchExtractor::new(
            ctx.source.clone(),
            table.clone(),
            ctx.settings.batch_size,
        );
        let loader = BatchLoader::new(
            ctx.destination.clone(),
            table.destination_name(),
            ctx.settings.conflict_policy,
            ctx.settings.transaction_mode,
        );
        let budget = RetryBudget::new(
            RetryPolicy::from_config(&ctx.settings),
            ctx.settings.idle_attempt_limit,
        );

        Self {
            state: TableRunState::queued(&table, level),
            ctx,
            table,
            extractor,
            loader,
            budget,
            pending: None,
            started: Instant::now(),
        }
    }

    /// Runs the table to a terminal state and returns its final snapshot.
    pub async fn run(mut self) -> TableRunState {
        self.started = Instant::now();
        self.state.status = TableStatus::Running;
        info!(table = %self.table.name, level = self.state.level, "Table migration started");
        self.emit(TableEventKind::Started).await;

        loop {
            if self.ctx.control.checkpoint().await.is_err() {
                return self.cancel().await;
            }

            match self.step().await {
                Ok(Step::Continue) => {}
                Ok(Step::Exhausted) => match self.commit().await {
                    Ok(()) => {
                        self.check_estimate().await;
                        return self.complete().await;
                    }
                    Err(err) => {
                        if let Some(state) = self.recover(err).await {
                            return state;
                        }
                    }
                },
                Ok(Step::Skipped { existing_rows }) => {
                    self.emit(TableEventKind::Skipped { existing_rows }).await;
                    return self.complete().await;
                }
                Err(err) => {
                    if let Some(state) = self.recover(err).await {
                        return state;
                    }
                }
            }
        }
    }

    async fn step(&mut self) -> Result<Step, StepError> {
        let limit = self.ctx.settings.batch_timeout();
        let attempts = self.budget.consecutive_failures() + 1;
        let batch_index = self.extractor.next_index();

        match timed(limit, self.loader.prepare()).await {
            None => return Err(StepError::TimedOut),
            Some(Err(err)) => return Err(StepError::load(err, batch_index, attempts)),
            Some(Ok(Preparation::Skipped { existing_rows })) => {
                return Ok(Step::Skipped { existing_rows });
            }
            Some(Ok(Preparation::Proceed)) => {}
        }

        let batch = match self.pending.take() {
            Some(batch) => batch,
            None => match timed(limit, self.extractor.next()).await {
                None => return Err(StepError::TimedOut),
                Some(Err(err)) => return Err(StepError::extract(err, batch_index, attempts)),
                Some(Ok(None)) => return Ok(Step::Exhausted),
                Some(Ok(Some(batch))) => batch,
            },
        };

        self.state.current_batch = batch.index;
        let rows = match timed(limit, self.loader.write(&batch)).await {
            None => {
                if self.loader.commits_per_batch() {
                    self.loader.abort().await;
                }
                self.pending = Some(batch);
                return Err(StepError::TimedOut);
            }
            Some(Err(err)) => {
                let index = batch.index;
                if err.is_transient() {
                    self.pending = Some(batch);
                }
                return Err(StepError::load(err, index, attempts));
            }
            Some(Ok(rows)) => rows,
        };

        // Unbounded: a commit dropped in flight may still land.
        if let Err(err) = self.loader.commit_batch().await {
            let index = batch.index;
            if err.is_transient() {
                self.pending = Some(batch);
            }
            return Err(StepError::load(err, index, attempts));
        }

        self.state.rows_copied += rows;
        self.ctx.metrics.record_batch(rows);
        self.budget.record_batch();
        if self.loader.commits_per_batch() {
            self.budget.record_durable_progress();
        }

        debug!(table = %self.table.name, batch = batch.index, rows, "Batch loaded");
        self.emit(TableEventKind::BatchCommitted {
            batch_index: batch.index,
            rows,
        })
        .await;

        Ok(Step::Continue)
    }

    async fn commit(&mut self) -> Result<(), StepError> {
        let batch_index = self.extractor.next_index();
        let attempts = self.budget.consecutive_failures() + 1;
        self.loader
            .finish()
            .await
            .map_err(|err| StepError::load(err, batch_index, attempts))?;
        self.budget.record_durable_progress();
        Ok(())
    }

    /// Handles a failed step. Returns the final state when the table is done
    /// for, or `None` to try again.
    async fn recover(&mut self, err: StepError) -> Option<TableRunState> {
        let (cause, error) = match err {
            StepError::Fatal(error) => return Some(self.fail(error).await),
            StepError::TimedOut => {
                let batch_index = self.extractor.next_index();
                if self.budget.record_idle() {
                    let error = TableError::Stalled {
                        table: self.table.name.clone(),
                        batch_index,
                        attempts: self.budget.idle_attempts(),
                    };
                    return Some(self.fail(error).await);
                }
                warn!(table = %self.table.name, batch = batch_index, "Batch attempt timed out");
                self.restart_if_transactional().await;
                return None;
            }
            StepError::Transient { cause, error } => (cause, error),
        };

        match self.budget.record_failure() {
            BudgetState::Exhausted => Some(self.fail(error).await),
            BudgetState::RetryAfter(delay) => {
                self.state.retries = self.budget.total_retries();
                self.ctx.metrics.increment_retries();
                warn!(
                    table = %self.table.name,
                    attempt = self.state.retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %cause,
                    "Transient failure, retrying"
                );
                self.state.last_error = Some(error.to_report(self.budget.consecutive_failures()));
                self.emit(TableEventKind::RetryScheduled {
                    attempt: self.state.retries,
                    delay,
                    error: cause,
                })
                .await;

                self.restart_if_transactional().await;

                if self.ctx.control.sleep(delay).await.is_err() {
                    return Some(self.cancel().await);
                }
                None
            }
        }
    }

    /// In per-table mode a failed attempt poisons the open transaction: roll
    /// it back and start the table over from its first batch.
    async fn restart_if_transactional(&mut self) {
        if self.loader.commits_per_batch() {
            return;
        }

        let discarded = self.loader.abort().await;
        self.pending = None;
        self.extractor.rewind(Cursor::Start, 0);

        if self.state.rows_copied > 0 || discarded > 0 {
            self.ctx.metrics.record_rollback(discarded);
            self.state.rows_copied = 0;
            self.state.current_batch = 0;
            self.emit(TableEventKind::RolledBack {
                rows_discarded: discarded,
            })
            .await;
        }
    }

    /// The catalog estimate is advisory; a different count only warns.
    async fn check_estimate(&mut self) {
        let estimated = self.state.total_rows;
        let copied = self.state.rows_copied;
        if copied == estimated {
            return;
        }

        warn!(
            table = %self.table.name,
            copied,
            estimated,
            "Row count differs from catalog estimate"
        );
        self.emit(TableEventKind::EstimateMismatch { estimated, copied })
            .await;
    }

    async fn complete(mut self) -> TableRunState {
        self.state.status = TableStatus::Completed;
        self.state.last_error = None;

        info!(
            table = %self.table.name,
            rows = self.state.rows_copied,
            retries = self.state.retries,
            "Table migration completed"
        );
        self.emit(TableEventKind::Completed).await;
        self.state
    }

    async fn fail(&mut self, error: TableError) -> TableRunState {
        let attempts = self.budget.consecutive_failures() + 1;
        if !self.loader.commits_per_batch() {
            let discarded = self.loader.abort().await;
            if discarded > 0 {
                self.ctx.metrics.record_rollback(discarded);
                self.emit(TableEventKind::RolledBack {
                    rows_discarded: discarded,
                })
                .await;
            }
            self.state.rows_copied = 0;
        }

        error!(table = %self.table.name, error = %error, "Table migration failed");
        self.ctx.metrics.increment_failures();
        self.state.status = TableStatus::Failed;
        self.state.last_error = Some(error.to_report(attempts));
        self.emit(TableEventKind::Failed).await;
        self.state.clone()
    }

    async fn cancel(&mut self) -> TableRunState {
        let discarded = self.loader.abort().await;
        if discarded > 0 {
            self.ctx.metrics.record_rollback(discarded);
            self.state.rows_copied = self.state.rows_copied.saturating_sub(discarded);
        }

        info!(table = %self.table.name, rows = self.state.rows_copied, "Table migration cancelled");
        self.state.status = TableStatus::Cancelled;
        self.emit(TableEventKind::Cancelled).await;
        self.state.clone()
    }

    async fn emit(&mut self, kind: TableEventKind) {
        self.state.record_elapsed(self.started.elapsed());
        let event = TableEvent::new(kind, self.state.clone());
        if self.ctx.events.send(event).await.is_err() {
            debug!(table = %self.table.name, "Event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use connectors::{
        destination::DestinationTx,
        memory::{Fault, FaultPlan, MemoryDestination, MemorySource},
    };
    use model::{
        config::{ConflictPolicy, TransactionMode},
        core::identifiers::QualifiedName,
        execution::failure::FailureKind,
    };
    use model::records::row::RowData;
    use std::time::Duration;

    /// Applies every commit, then takes `delay` to acknowledge it.
    struct SlowAckDestination {
        inner: Arc<MemoryDestination>,
        delay: Duration,
    }

    struct SlowAckTx {
        inner: Box<dyn DestinationTx>,
        delay: Duration,
    }

    #[async_trait]
    impl Destination for SlowAckDestination {
        async fn row_count(&self, table: &QualifiedName) -> Result<u64, LoadError> {
            self.inner.row_count(table).await
        }

        async fn truncate(&self, table: &QualifiedName) -> Result<(), LoadError> {
            self.inner.truncate(table).await
        }

        async fn begin(&self, table: &QualifiedName) -> Result<Box<dyn DestinationTx>, LoadError> {
            Ok(Box::new(SlowAckTx {
                inner: self.inner.begin(table).await?,
                delay: self.delay,
            }))
        }

        async fn suspend_foreign_keys(&self, table: &QualifiedName) -> Result<(), LoadError> {
            self.inner.suspend_foreign_keys(table).await
        }

        async fn restore_foreign_keys(&self, table: &QualifiedName) -> Result<(), LoadError> {
            self.inner.restore_foreign_keys(table).await
        }
    }

    #[async_trait]
    impl DestinationTx for SlowAckTx {
        async fn insert(&mut self, rows: &[RowData]) -> Result<u64, LoadError> {
            self.inner.insert(rows).await
        }

        async fn commit(self: Box<Self>) -> Result<(), LoadError> {
            self.inner.commit().await?;
            tokio::time::sleep(self.delay).await;
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<(), LoadError> {
            self.inner.rollback().await
        }
    }

    struct Harness {
        source: Arc<MemorySource>,
        destination: Arc<MemoryDestination>,
        events: mpsc::Receiver<TableEvent>,
        ctx: WorkerContext,
        table: TableDescriptor,
    }

    fn harness(rows: u64, settings: MigrationConfig) -> Harness {
        let table = TableDescriptor::new(QualifiedName::new("HR", "DEPARTMENTS"))
            .with_primary_key(["DEPARTMENT_ID"])
            .with_estimated_rows(rows);
        let catalog = [table.clone()];
        let source = Arc::new(MemorySource::from_catalog(&catalog));
        let destination = Arc::new(MemoryDestination::from_catalog(&catalog));
        let (tx, events) = mpsc::channel(1024);

        let ctx = WorkerContext {
            settings,
            source: source.clone(),
            destination: destination.clone(),
            control: RunControl::new(),
            metrics: Metrics::new(),
            events: tx,
        };

        Harness {
            source,
            destination,
            events,
            ctx,
            table,
        }
    }

    fn settings(max_retries: u32) -> MigrationConfig {
        MigrationConfig {
            batch_size: 10,
            max_retries,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 4,
            ..Default::default()
        }
    }

    fn drain(events: &mut mpsc::Receiver<TableEvent>) -> Vec<TableEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn copies_every_row_and_reports_progress_per_batch() {
        let mut h = harness(27, settings(3));
        let state = TableWorker::new(h.ctx.clone(), h.table.clone(), 0).run().await;

        assert_eq!(state.status, TableStatus::Completed);
        assert_eq!(state.rows_copied, 27);
        assert_eq!(state.current_batch, 2);
        assert_eq!(
            h.destination.row_count(&h.table.name).await.unwrap(),
            27
        );

        let kinds = drain(&mut h.events);
        assert_eq!(kinds.first(), Some(&TableEventKind::Started));
        assert_eq!(kinds.last(), Some(&TableEventKind::Completed));
        let batches = kinds
            .iter()
            .filter(|k| matches!(k, TableEventKind::BatchCommitted { .. }))
            .count();
        assert_eq!(batches, 3);
    }

    #[tokio::test]
    async fn fewer_rows_than_estimated_still_completes() {
        let mut h = harness(27, settings(3));
        let actual = h.table.clone().with_estimated_rows(25);
        let rows = connectors::fixture::rows_for(&actual, std::slice::from_ref(&actual));
        h.ctx.source = Arc::new(MemorySource::new().with_table(&h.table, rows));

        let state = TableWorker::new(h.ctx.clone(), h.table.clone(), 0).run().await;

        assert_eq!(state.status, TableStatus::Completed);
        assert_eq!(state.rows_copied, 25);
        assert!(drain(&mut h.events).contains(&TableEventKind::EstimateMismatch {
            estimated: 27,
            copied: 25,
        }));
    }

    #[tokio::test]
    async fn two_transient_failures_then_success_records_two_retries() {
        let h = harness(27, settings(3));
        h.source
            .inject(&h.table.name, FaultPlan::new(Fault::Transient).times(2))
            .await;

        let state = TableWorker::new(h.ctx.clone(), h.table.clone(), 0).run().await;
        assert_eq!(state.status, TableStatus::Completed);
        assert_eq!(state.retries, 2);
        assert_eq!(state.rows_copied, 27);
    }

    #[tokio::test]
    async fn permanent_failure_stops_after_max_retries() {
        let h = harness(27, settings(2));
        h.source
            .inject(&h.table.name, FaultPlan::new(Fault::Transient))
            .await;

        let state = TableWorker::new(h.ctx.clone(), h.table.clone(), 0).run().await;
        assert_eq!(state.status, TableStatus::Failed);
        assert_eq!(state.retries, 2);

        let report = state.last_error.unwrap();
        assert_eq!(report.kind, FailureKind::RetriesExhausted);
        assert_eq!(report.attempts, 3);
        assert_eq!(h.source.read_log().await.len(), 3);
    }

    #[tokio::test]
    async fn constraint_error_fails_without_retry_and_rolls_back() {
        let h = harness(27, settings(3));
        h.destination
            .inject(
                &h.table.name,
                FaultPlan::new(Fault::Constraint).after(1).times(1),
            )
            .await;

        let state = TableWorker::new(h.ctx.clone(), h.table.clone(), 0).run().await;
        assert_eq!(state.status, TableStatus::Failed);
        assert_eq!(state.retries, 0);
        assert_eq!(state.rows_copied, 0);

        let report = state.last_error.unwrap();
        assert_eq!(report.kind, FailureKind::Constraint);
        assert_eq!(report.batch_index, Some(1));
        assert_eq!(report.offending_rows, vec![0]);
        assert_eq!(h.destination.row_count(&h.table.name).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn per_table_retry_restarts_from_the_first_batch() {
        let mut h = harness(27, settings(3));
        h.destination
            .inject(&h.table.name, FaultPlan::new(Fault::Transient).after(2).times(1))
            .await;

        let state = TableWorker::new(h.ctx.clone(), h.table.clone(), 0).run().await;
        assert_eq!(state.status, TableStatus::Completed);
        assert_eq!(state.retries, 1);
        assert_eq!(state.rows_copied, 27);
        assert_eq!(h.destination.row_count(&h.table.name).await.unwrap(), 27);

        let kinds = drain(&mut h.events);
        assert!(kinds.contains(&TableEventKind::RolledBack { rows_discarded: 20 }));
    }

    #[tokio::test]
    async fn per_batch_retry_resumes_at_the_failed_batch() {
        let settings = MigrationConfig {
            transaction_mode: TransactionMode::PerBatch,
            ..settings(3)
        };
        let h = harness(27, settings);
        h.destination
            .inject(&h.table.name, FaultPlan::new(Fault::Transient).after(2).times(1))
            .await;

        let state = TableWorker::new(h.ctx.clone(), h.table.clone(), 0).run().await;
        assert_eq!(state.status, TableStatus::Completed);
        assert_eq!(state.retries, 1);
        assert_eq!(h.destination.row_count(&h.table.name).await.unwrap(), 27);
        // the failed batch is retried without being read again
        assert_eq!(h.source.read_log().await.len(), 3);
    }

    #[tokio::test]
    async fn skip_policy_completes_with_zero_rows() {
        let settings = MigrationConfig {
            conflict_policy: ConflictPolicy::Skip,
            ..settings(3)
        };
        let mut h = harness(27, settings);
        h.destination
            .seed(&h.table.name, connectors::fixture::rows_for(&h.table, &[]))
            .await;

        let state = TableWorker::new(h.ctx.clone(), h.table.clone(), 0).run().await;
        assert_eq!(state.status, TableStatus::Completed);
        assert_eq!(state.rows_copied, 0);
        assert!(drain(&mut h.events).contains(&TableEventKind::Skipped { existing_rows: 27 }));
        assert!(h.source.read_log().await.is_empty());
    }

    #[tokio::test]
    async fn repeated_timeouts_mark_the_table_stalled() {
        let settings = MigrationConfig {
            batch_timeout_ms: 20,
            idle_attempt_limit: 2,
            ..settings(3)
        };
        let h = harness(27, settings);
        h.source
            .inject(
                &h.table.name,
                FaultPlan::new(Fault::Delay(Duration::from_secs(5))),
            )
            .await;

        let state = TableWorker::new(h.ctx.clone(), h.table.clone(), 0).run().await;
        assert_eq!(state.status, TableStatus::Failed);
        assert_eq!(state.last_error.unwrap().kind, FailureKind::Stalled);
    }

    #[tokio::test]
    async fn cancelled_run_stops_at_the_next_batch_boundary() {
        let h = harness(27, settings(3));
        h.ctx.control.cancel();

        let state = TableWorker::new(h.ctx.clone(), h.table.clone(), 0).run().await;
        assert_eq!(state.status, TableStatus::Cancelled);
        assert_eq!(state.rows_copied, 0);
        assert!(h.source.read_log().await.is_empty());
    }

    async fn run_with_slow_commits(mode: TransactionMode) -> (TableRunState, u64) {
        let settings = MigrationConfig {
            transaction_mode: mode,
            batch_timeout_ms: 20,
            idle_attempt_limit: 3,
            ..settings(3)
        };
        let mut h = harness(27, settings);
        h.ctx.destination = Arc::new(SlowAckDestination {
            inner: h.destination.clone(),
            delay: Duration::from_millis(100),
        });

        let state = TableWorker::new(h.ctx.clone(), h.table.clone(), 0).run().await;
        let landed = h.destination.row_count(&h.table.name).await.unwrap();
        (state, landed)
    }

    #[tokio::test]
    async fn slow_batch_commits_are_never_written_twice() {
        let (state, landed) = run_with_slow_commits(TransactionMode::PerBatch).await;

        assert_eq!(state.status, TableStatus::Completed);
        assert_eq!(state.rows_copied, 27);
        assert_eq!(state.retries, 0);
        assert_eq!(landed, 27);
    }

    #[tokio::test]
    async fn slow_table_commit_is_not_restarted() {
        let (state, landed) = run_with_slow_commits(TransactionMode::PerTable).await;

        assert_eq!(state.status, TableStatus::Completed);
        assert_eq!(state.rows_copied, 27);
        assert_eq!(landed, 27);
    }

    #[tokio::test]
    async fn timed_out_write_is_rolled_back_before_it_is_resent() {
        let settings = MigrationConfig {
            transaction_mode: TransactionMode::PerBatch,
            batch_timeout_ms: 20,
            idle_attempt_limit: 3,
            ..settings(3)
        };
        let h = harness(27, settings);
        h.destination
            .inject(
                &h.table.name,
                FaultPlan::new(Fault::Delay(Duration::from_millis(200))).times(1),
            )
            .await;

        let state = TableWorker::new(h.ctx.clone(), h.table.clone(), 0).run().await;
        assert_eq!(state.status, TableStatus::Completed);
        assert_eq!(h.destination.row_count(&h.table.name).await.unwrap(), 27);
    }
}
