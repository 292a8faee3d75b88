use connectors::{
    destination::{Destination, DestinationTx},
    error::LoadError,
};
use model::{
    config::{ConflictPolicy, TransactionMode},
    core::identifiers::QualifiedName,
    records::batch::Batch,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of applying the conflict policy to a destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preparation {
    Proceed,
    /// `skip` found rows already there; nothing will be written.
    Skipped { existing_rows: u64 },
}

/// Writes batches of one table to the destination.
///
/// In `per-table` mode every batch joins a single transaction that
/// [`BatchLoader::finish`] commits; in `per-batch` mode each batch commits on
/// its own. Either way a batch lands completely or not at all.
pub struct BatchLoader {
    destination: Arc<dyn Destination>,
    table: QualifiedName,
    policy: ConflictPolicy,
    mode: TransactionMode,
    preparation: Option<Preparation>,
    tx: Option<Box<dyn DestinationTx>>,
    uncommitted: u64,
}

impl BatchLoader {
    pub fn new(
        destination: Arc<dyn Destination>,
        table: QualifiedName,
        policy: ConflictPolicy,
        mode: TransactionMode,
    ) -> Self {
        Self {
            destination,
            table,
            policy,
            mode,
            preparation: None,
            tx: None,
            uncommitted: 0,
        }
    }

    pub fn table(&self) -> &QualifiedName {
        &self.table
    }

    /// Rows accepted into the open table transaction but not yet committed.
    pub fn uncommitted_rows(&self) -> u64 {
        self.uncommitted
    }

    pub fn commits_per_batch(&self) -> bool {
        self.mode == TransactionMode::PerBatch
    }

    /// Applies the conflict policy. Runs once per table: after the first
    /// success, later calls (including retries) return the cached outcome
    /// and never truncate again.
    pub async fn prepare(&mut self) -> Result<Preparation, LoadError> {
        if let Some(preparation) = self.preparation {
            return Ok(preparation);
        }

        let existing = self.destination.row_count(&self.table).await?;
        let preparation = match (self.policy, existing) {
            (_, 0) => Preparation::Proceed,
            (ConflictPolicy::Skip, existing_rows) => {
                info!(table = %self.table, rows = existing_rows, "Destination not empty, skipping table");
                Preparation::Skipped { existing_rows }
            }
            (ConflictPolicy::Truncate, rows) => {
                self.destination.truncate(&self.table).await?;
                info!(table = %self.table, rows, "Truncated destination table");
                Preparation::Proceed
            }
            (ConflictPolicy::Fail, rows) => {
                return Err(LoadError::DestinationNotEmpty {
                    table: self.table.clone(),
                    rows,
                });
            }
        };

        self.preparation = Some(preparation);
        Ok(preparation)
    }

    /// Inserts one batch into the open transaction, beginning one if needed,
    /// and returns how many rows it carried. Nothing is committed here.
    ///
    /// A failed insert in `per-batch` mode rolls back that batch's
    /// transaction; in `per-table` mode the caller decides via [`abort`].
    ///
    /// [`abort`]: BatchLoader::abort
    pub async fn write(&mut self, batch: &Batch) -> Result<u64, LoadError> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => self.destination.begin(&self.table).await?,
        };
        let inserted = self.tx.insert(tx).insert(&batch.rows).await;

        match inserted {
            Ok(rows) => {
                self.uncommitted += rows;
                Ok(rows)
            }
            Err(err) => {
                if self.mode == TransactionMode::PerBatch {
                    let discarded = self.abort().await;
                    debug!(table = %self.table, batch = batch.index, discarded, "Rolled back failed batch");
                }
                Err(err)
            }
        }
    }

    /// Commits the batch staged by [`BatchLoader::write`] in `per-batch`
    /// mode. A no-op in `per-table` mode, where [`BatchLoader::finish`]
    /// commits.
    pub async fn commit_batch(&mut self) -> Result<(), LoadError> {
        if self.mode != TransactionMode::PerBatch {
            return Ok(());
        }
        if let Some(tx) = self.tx.take() {
            self.uncommitted = 0;
            tx.commit().await?;
        }
        Ok(())
    }

    /// Commits the open table transaction, if there is one.
    pub async fn finish(&mut self) -> Result<(), LoadError> {
        if let Some(tx) = self.tx.take() {
            let rows = std::mem::take(&mut self.uncommitted);
            tx.commit().await?;
            info!(table = %self.table, rows, "Committed table transaction");
        }
        Ok(())
    }

    /// Rolls back the open table transaction and returns the rows it held.
    pub async fn abort(&mut self) -> u64 {
        let discarded = std::mem::take(&mut self.uncommitted);
        if let Some(tx) = self.tx.take() {
            if let Err(err) = tx.rollback().await {
                warn!(table = %self.table, error = %err, "Rollback failed");
            }
        }
        discarded
    }
}
