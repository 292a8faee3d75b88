use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

/// What to do when the destination table already holds rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Leave a non-empty destination alone and report zero rows copied.
    Skip,
    /// Clear the destination once, before the first batch.
    Truncate,
    /// Abort the table when the destination is non-empty.
    #[default]
    Fail,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Skip => "skip",
            ConflictPolicy::Truncate => "truncate",
            ConflictPolicy::Fail => "fail",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(ConflictPolicy::Skip),
            "truncate" => Ok(ConflictPolicy::Truncate),
            "fail" => Ok(ConflictPolicy::Fail),
            other => Err(format!("unknown conflict policy `{other}`")),
        }
    }
}

/// Transaction scope used by the batch loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionMode {
    #[default]
    PerTable,
    PerBatch,
}

impl TransactionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionMode::PerTable => "per-table",
            TransactionMode::PerBatch => "per-batch",
        }
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "per-table" => Ok(TransactionMode::PerTable),
            "per-batch" => Ok(TransactionMode::PerBatch),
            other => Err(format!("unknown transaction mode `{other}`")),
        }
    }
}

/// User-supplied migration settings.
///
/// Values are not checked here; `planner::validation` rejects bad ones
/// before a plan is built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrationConfig {
    pub batch_size: usize,
    pub max_parallel: usize,
    pub conflict_policy: ConflictPolicy,
    pub transaction_mode: TransactionMode,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Upper bound for a single extractor read or loader write. `0` disables it.
    pub batch_timeout_ms: u64,
    /// Consecutive timed-out attempts before a table is reported as stalled.
    pub idle_attempt_limit: u32,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            max_parallel: 4,
            conflict_policy: ConflictPolicy::Fail,
            transaction_mode: TransactionMode::PerTable,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            batch_timeout_ms: 300_000,
            idle_attempt_limit: 3,
        }
    }
}

impl MigrationConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        (self.batch_timeout_ms > 0).then(|| Duration::from_millis(self.batch_timeout_ms))
    }
}
