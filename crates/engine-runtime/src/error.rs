use thiserror::Error;

/// The run itself broke down, as opposed to individual tables failing.
#[derive(Debug, Error)]
pub enum RunError {
    /// The scheduler task panicked or was aborted.
    #[error("Scheduler task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
