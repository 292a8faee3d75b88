use crate::{error::RunError, report::RunReport, scheduler::Scheduler, state::RunState};
use connectors::{destination::Destination, source::RowSource};
use engine_core::control::RunControl;
use model::core::identifiers::RunId;
use planner::MigrationPlan;
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::info;

/// Source and destination shared by every worker of a run.
#[derive(Clone)]
pub struct Connections {
    pub source: Arc<dyn RowSource>,
    pub destination: Arc<dyn Destination>,
}

impl Connections {
    pub fn new(source: Arc<dyn RowSource>, destination: Arc<dyn Destination>) -> Self {
        Self {
            source,
            destination,
        }
    }
}

/// Handle to a run executing in the background.
///
/// Control calls are signals: they take effect at the next batch boundary.
pub struct RunHandle {
    run_id: RunId,
    control: RunControl,
    state: watch::Receiver<RunState>,
    task: JoinHandle<RunReport>,
}

/// Spawns the scheduler for `plan` and returns immediately.
pub fn start_run(plan: MigrationPlan, connections: Connections) -> RunHandle {
    let run_id = RunId::generate();
    let control = RunControl::new();
    let initial = RunState::new(run_id.clone(), &plan);
    let (publisher, state) = watch::channel(initial.clone());

    info!(
        run_id = %run_id,
        plan = %plan.fingerprint(),
        tables = plan.table_count(),
        "Starting migration run"
    );

    let scheduler = Scheduler::new(
        Arc::new(plan),
        connections,
        control.clone(),
        initial,
        publisher,
    );
    let task = tokio::spawn(scheduler.run());

    RunHandle {
        run_id,
        control,
        state,
        task,
    }
}

impl RunHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Latest published snapshot of the run.
    pub fn status(&self) -> RunState {
        self.state.borrow().clone()
    }

    /// Receiver that is notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.clone()
    }

    /// Stops dispatching new tables and batches. Returns false if already paused.
    pub fn pause(&self) -> bool {
        info!(run_id = %self.run_id, "Pause requested");
        self.control.pause()
    }

    pub fn resume(&self) -> bool {
        info!(run_id = %self.run_id, "Resume requested");
        self.control.resume()
    }

    /// Idempotent. In-flight per-batch commits finish; open table
    /// transactions are rolled back.
    pub fn cancel(&self) {
        info!(run_id = %self.run_id, "Cancel requested");
        self.control.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the run to reach a terminal state.
    pub async fn wait(self) -> Result<RunReport, RunError> {
        Ok(self.task.await?)
    }
}
