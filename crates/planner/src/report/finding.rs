use model::core::identifiers::QualifiedName;
use serde::Serialize;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum FindingKind {
    Dependency, // cycles, self references
    SourceSchema,
    Batching,
    Destination,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Finding {
    pub code: String, // stable programmatic id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<QualifiedName>,
    pub message: String,
    pub severity: Severity,
    pub kind: FindingKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

const CODE_CYCLE_DETECTED: &str = "CYCLE_DETECTED";
const CODE_SELF_REFERENCE: &str = "SELF_REFERENCE";
const CODE_MISSING_PRIMARY_KEY: &str = "MISSING_PRIMARY_KEY";
const CODE_EMPTY_TABLE: &str = "EMPTY_TABLE";
const CODE_SINGLE_BATCH: &str = "SINGLE_BATCH";
const CODE_DESTINATION_OVERRIDE: &str = "DESTINATION_OVERRIDE";

impl Finding {
    pub fn new(
        code: &str,
        table: Option<QualifiedName>,
        message: String,
        severity: Severity,
        kind: FindingKind,
        suggestion: Option<String>,
    ) -> Self {
        Finding {
            code: code.to_string(),
            table,
            message,
            severity,
            kind,
            suggestion,
        }
    }

    pub fn new_cycle_detected(members: &[QualifiedName]) -> Self {
        let list = members
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Self::new(
            CODE_CYCLE_DETECTED,
            None,
            format!("Foreign keys form a cycle between {list}"),
            Severity::Warning,
            FindingKind::Dependency,
            Some("Rows are loaded first; foreign keys are re-applied after all levels finish.".into()),
        )
    }

    pub fn new_self_reference(table: &QualifiedName) -> Self {
        Self::new(
            CODE_SELF_REFERENCE,
            Some(table.clone()),
            format!("Table `{table}` references itself"),
            Severity::Info,
            FindingKind::Dependency,
            Some("Its foreign keys are suspended while loading and restored afterwards.".into()),
        )
    }

    pub fn new_missing_primary_key(table: &QualifiedName) -> Self {
        Self::new(
            CODE_MISSING_PRIMARY_KEY,
            Some(table.clone()),
            format!("Table `{table}` has no primary key; batches resume by row offset"),
            Severity::Warning,
            FindingKind::SourceSchema,
            Some("Add a primary key so interrupted batches can resume by key.".into()),
        )
    }

    pub fn new_empty_table(table: &QualifiedName) -> Self {
        Self::new(
            CODE_EMPTY_TABLE,
            Some(table.clone()),
            format!("Table `{table}` is estimated to hold no rows"),
            Severity::Info,
            FindingKind::SourceSchema,
            None,
        )
    }

    pub fn new_single_batch(table: &QualifiedName) -> Self {
        Self::new(
            CODE_SINGLE_BATCH,
            Some(table.clone()),
            format!("Table `{table}` will be migrated in 1 batch"),
            Severity::Info,
            FindingKind::Batching,
            None,
        )
    }

    pub fn new_destination_override(table: &QualifiedName, destination: &QualifiedName) -> Self {
        Self::new(
            CODE_DESTINATION_OVERRIDE,
            Some(table.clone()),
            format!("Table `{table}` is written to `{destination}`"),
            Severity::Info,
            FindingKind::Destination,
            None,
        )
    }
}
