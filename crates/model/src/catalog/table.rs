use crate::core::identifiers::QualifiedName;
use serde::{Deserialize, Serialize};

/// A foreign key from the owning table to `references`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    pub columns: Vec<String>,
    pub references: QualifiedName,
    #[serde(default)]
    pub referenced_columns: Vec<String>,
}

/// One source table as reported by the schema catalog.
///
/// Descriptors are immutable once planning starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    pub name: QualifiedName,

    #[serde(default)]
    pub primary_key: Vec<String>,

    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,

    /// Row count estimate from catalog statistics.
    #[serde(default)]
    pub estimated_rows: u64,

    /// Destination (schema, name) when it differs from the source name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<QualifiedName>,
}

impl TableDescriptor {
    pub fn new(name: QualifiedName) -> Self {
        Self {
            name,
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            estimated_rows: 0,
            destination: None,
        }
    }

    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a single-column foreign key `column -> references(referenced_column)`.
    pub fn with_foreign_key(
        mut self,
        column: impl Into<String>,
        references: QualifiedName,
        referenced_column: impl Into<String>,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            columns: vec![column.into()],
            references,
            referenced_columns: vec![referenced_column.into()],
        });
        self
    }

    pub fn with_estimated_rows(mut self, rows: u64) -> Self {
        self.estimated_rows = rows;
        self
    }

    pub fn with_destination(mut self, destination: QualifiedName) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn destination_name(&self) -> QualifiedName {
        self.destination
            .clone()
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Tables this one references, excluding itself.
    pub fn dependencies(&self) -> impl Iterator<Item = &QualifiedName> {
        self.foreign_keys
            .iter()
            .map(|fk| &fk.references)
            .filter(move |target| **target != self.name)
    }

    pub fn is_self_referencing(&self) -> bool {
        self.foreign_keys.iter().any(|fk| fk.references == self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employees() -> TableDescriptor {
        TableDescriptor::new(QualifiedName::new("HR", "EMPLOYEES"))
            .with_primary_key(["EMPLOYEE_ID"])
            .with_foreign_key(
                "DEPARTMENT_ID",
                QualifiedName::new("HR", "DEPARTMENTS"),
                "DEPARTMENT_ID",
            )
            .with_foreign_key(
                "MANAGER_ID",
                QualifiedName::new("HR", "EMPLOYEES"),
                "EMPLOYEE_ID",
            )
            .with_estimated_rows(107)
    }

    #[test]
    fn dependencies_skip_self_references() {
        let table = employees();
        let deps: Vec<_> = table.dependencies().cloned().collect();
        assert_eq!(deps, vec![QualifiedName::new("HR", "DEPARTMENTS")]);
        assert!(table.is_self_referencing());
    }

    #[test]
    fn destination_defaults_to_source_name() {
        let table = employees();
        assert_eq!(table.destination_name(), table.name);

        let renamed = table.with_destination(QualifiedName::new("dbo", "Employees"));
        assert_eq!(renamed.destination_name().to_string(), "dbo.Employees");
    }

    #[test]
    fn parses_catalog_json_with_defaults() {
        let raw = r#"[
            {"name": "HR.DEPARTMENTS", "primaryKey": ["DEPARTMENT_ID"], "estimatedRows": 27},
            {"name": "HR.EMPLOYEES",
             "foreignKeys": [{"columns": ["DEPARTMENT_ID"], "references": "HR.DEPARTMENTS"}]}
        ]"#;

        let tables = crate::catalog::from_json(raw).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].estimated_rows, 27);
        assert!(tables[1].primary_key.is_empty());
        assert_eq!(
            tables[1].foreign_keys[0].references,
            QualifiedName::new("HR", "DEPARTMENTS")
        );
    }
}
