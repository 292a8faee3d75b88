use crate::core::identifiers::QualifiedName;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient errors outlasted the retry budget.
    RetriesExhausted,
    Constraint,
    SchemaMismatch,
    Conflict,
    Stalled,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RetriesExhausted => "retries_exhausted",
            FailureKind::Constraint => "constraint",
            FailureKind::SchemaMismatch => "schema_mismatch",
            FailureKind::Conflict => "conflict",
            FailureKind::Stalled => "stalled",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable record of why a table failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub table: QualifiedName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<u64>,
    pub message: String,
    /// Row positions inside the failing batch, when the destination named them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offending_rows: Vec<usize>,
    pub attempts: u32,
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.table)?;
        if let Some(batch) = self.batch_index {
            write!(f, " batch {batch}")?;
        }
        write!(f, ": {}", self.message)
    }
}
