use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    rows_copied: AtomicU64,
    batches_committed: AtomicU64,
    rollbacks: AtomicU64,
    retry_count: AtomicU64,
    failure_count: AtomicU64,
}

/// Run-wide counters shared by every worker.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub rows_copied: u64,
    pub batches_committed: u64,
    pub rollbacks: u64,
    pub retry_count: u64,
    pub failure_count: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self, rows: u64) {
        self.inner.rows_copied.fetch_add(rows, Ordering::Relaxed);
        self.inner.batches_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Rows staged in a per-table transaction that was rolled back.
    pub fn record_rollback(&self, rows: u64) {
        let _ = self
            .inner
            .rows_copied
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |copied| {
                Some(copied.saturating_sub(rows))
            });
        self.inner.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retries(&self) {
        self.inner.retry_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failures(&self) {
        self.inner.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_copied: self.inner.rows_copied.load(Ordering::Relaxed),
            batches_committed: self.inner.batches_committed.load(Ordering::Relaxed),
            rollbacks: self.inner.rollbacks.load(Ordering::Relaxed),
            retry_count: self.inner.retry_count.load(Ordering::Relaxed),
            failure_count: self.inner.failure_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_clones() {
        let metrics = Metrics::new();
        let worker = metrics.clone();

        worker.record_batch(50);
        worker.record_batch(7);
        worker.increment_retries();
        worker.record_rollback(7);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rows_copied, 50);
        assert_eq!(snapshot.batches_committed, 2);
        assert_eq!(snapshot.rollbacks, 1);
        assert_eq!(snapshot.retry_count, 1);
    }
}
