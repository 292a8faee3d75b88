use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("Expected a schema-qualified name `SCHEMA.TABLE`, got `{0}`")]
    Unqualified(String),

    #[error("Empty identifier part in `{0}`")]
    EmptyPart(String),
}

/// A schema-qualified table name such as `HR.EMPLOYEES`.
///
/// Ordering is lexicographic by schema, then table. The planner relies on it
/// for deterministic tie-breaks inside a dependency level.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QualifiedName {
    pub schema: String,
    pub table: String,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

impl FromStr for QualifiedName {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (schema, table) = s
            .split_once('.')
            .ok_or_else(|| IdentifierError::Unqualified(s.to_string()))?;

        let (schema, table) = (schema.trim(), table.trim());
        if schema.is_empty() || table.is_empty() {
            return Err(IdentifierError::EmptyPart(s.to_string()));
        }

        Ok(QualifiedName::new(schema, table))
    }
}

impl TryFrom<String> for QualifiedName {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QualifiedName> for String {
    fn from(name: QualifiedName) -> Self {
        name.to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Arc<str>);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::from(id.into()))
    }

    /// Fresh random run identifier (`run-<uuid>`).
    pub fn generate() -> Self {
        Self::new(format!("run-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_schema_qualified_names() {
        let name: QualifiedName = "HR.EMPLOYEES".parse().unwrap();
        assert_eq!(name, QualifiedName::new("HR", "EMPLOYEES"));
        assert_eq!(name.to_string(), "HR.EMPLOYEES");
    }

    #[test]
    fn rejects_unqualified_and_empty_parts() {
        assert_eq!(
            "EMPLOYEES".parse::<QualifiedName>(),
            Err(IdentifierError::Unqualified("EMPLOYEES".into()))
        );
        assert!(matches!(
            ".EMPLOYEES".parse::<QualifiedName>(),
            Err(IdentifierError::EmptyPart(_))
        ));
    }

    #[test]
    fn orders_by_schema_then_table() {
        let mut names = vec![
            QualifiedName::new("SALES", "ORDERS"),
            QualifiedName::new("HR", "JOBS"),
            QualifiedName::new("HR", "DEPARTMENTS"),
        ];
        names.sort();
        let rendered: Vec<String> = names.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["HR.DEPARTMENTS", "HR.JOBS", "SALES.ORDERS"]);
    }

    #[test]
    fn serializes_as_plain_string() {
        let name = QualifiedName::new("SALES", "CUSTOMERS");
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"SALES.CUSTOMERS\"");

        let back: QualifiedName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }

    #[test]
    fn generated_run_ids_are_unique() {
        assert_ne!(RunId::generate(), RunId::generate());
        assert!(RunId::generate().as_str().starts_with("run-"));
    }
}
