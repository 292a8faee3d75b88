use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Returned from a checkpoint once the run has been cancelled.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Migration run cancelled")]
pub struct RunCancelled;

/// Shared pause/cancel switches for one run.
///
/// Workers only observe them at batch boundaries, so an open transaction is
/// never interrupted halfway.
#[derive(Clone)]
pub struct RunControl {
    cancel: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            paused: Arc::new(paused),
        }
    }

    pub fn pause(&self) -> bool {
        self.paused.send_if_modified(|paused| !std::mem::replace(paused, true))
    }

    pub fn resume(&self) -> bool {
        self.paused.send_if_modified(|paused| std::mem::replace(paused, false))
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe_pause(&self) -> watch::Receiver<bool> {
        self.paused.subscribe()
    }

    /// Batch boundary: blocks while paused, fails once cancelled.
    pub async fn checkpoint(&self) -> Result<(), RunCancelled> {
        if self.is_cancelled() {
            return Err(RunCancelled);
        }

        let mut paused = self.paused.subscribe();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RunCancelled),
            res = paused.wait_for(|p| !*p) => res.map(|_| ()).map_err(|_| RunCancelled),
        }
    }

    /// Sleeps for `delay` unless the run is cancelled first.
    pub async fn sleep(&self, delay: Duration) -> Result<(), RunCancelled> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RunCancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
