use crate::core::identifiers::QualifiedName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        })
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level `{other}`")),
        }
    }
}

/// One line of the per-run log shown to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<QualifiedName>,
    pub at: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, table: Option<QualifiedName>, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            table,
            at: Utc::now(),
        }
    }
}

/// Entries of `entries` at exactly `level`, or all of them when `level` is `None`.
pub fn filter<'a>(
    entries: impl IntoIterator<Item = &'a LogEntry>,
    level: Option<LogLevel>,
) -> Vec<&'a LogEntry> {
    entries
        .into_iter()
        .filter(|e| level.is_none_or(|l| e.level == l))
        .collect()
}

pub const MAX_LOG_ENTRIES: usize = 1_000;

fn default_capacity() -> usize {
    MAX_LOG_ENTRIES
}

/// Run log holding at most `capacity` entries; the oldest are evicted first
/// and counted in `dropped`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLog {
    entries: VecDeque<LogEntry>,
    dropped: u64,
    #[serde(skip, default = "default_capacity")]
    capacity: usize,
}

impl Default for RunLog {
    fn default() -> Self {
        Self::with_capacity(MAX_LOG_ENTRIES)
    }
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            dropped: 0,
            capacity,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries evicted to stay within capacity.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn filter(&self, level: Option<LogLevel>) -> Vec<&LogEntry> {
        filter(&self.entries, level)
    }
}
