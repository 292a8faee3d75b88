use crate::{error::ConfigError, graph::DependencyGraph, validation::validate_config};
use model::{
    catalog::table::TableDescriptor, config::MigrationConfig, core::identifiers::QualifiedName,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{info, warn};

/// One topological generation: tables with no dependency among them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLevel {
    pub index: usize,
    pub tables: Vec<QualifiedName>,
}

/// Ordered levels plus run settings. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub levels: Vec<PlanLevel>,
    pub settings: MigrationConfig,

    /// Tables caught in foreign-key cycles, one entry per cycle.
    pub cycles: Vec<Vec<QualifiedName>>,

    /// Tables whose foreign keys are suspended while loading and restored
    /// once every level has run: cycle members and self-referencing tables.
    pub deferred_constraints: BTreeSet<QualifiedName>,

    tables: BTreeMap<QualifiedName, TableDescriptor>,
    fingerprint: String,
}

impl MigrationPlan {
    pub fn table(&self, name: &QualifiedName) -> Option<&TableDescriptor> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.values()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn total_estimated_rows(&self) -> u64 {
        self.tables.values().map(|t| t.estimated_rows).sum()
    }

    pub fn is_cyclic(&self) -> bool {
        !self.cycles.is_empty()
    }

    pub fn is_deferred(&self, table: &QualifiedName) -> bool {
        self.deferred_constraints.contains(table)
    }

    /// Stable digest of levels, settings and descriptors.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn level_of(&self, table: &QualifiedName) -> Option<usize> {
        self.levels
            .iter()
            .find(|level| level.tables.contains(table))
            .map(|level| level.index)
    }

    /// Every table that references `table`, directly or through other tables.
    pub fn dependents_of(&self, table: &QualifiedName) -> BTreeSet<QualifiedName> {
        let mut found = BTreeSet::new();
        let mut queue = VecDeque::from([table.clone()]);

        while let Some(current) = queue.pop_front() {
            for descriptor in self.tables.values() {
                if descriptor.name == *table || found.contains(&descriptor.name) {
                    continue;
                }
                if descriptor.dependencies().any(|dep| *dep == current) {
                    found.insert(descriptor.name.clone());
                    queue.push_back(descriptor.name.clone());
                }
            }
        }

        found
    }
}

fn compute_fingerprint(
    levels: &[PlanLevel],
    settings: &MigrationConfig,
    tables: &BTreeMap<QualifiedName, TableDescriptor>,
) -> String {
    let descriptors: Vec<&TableDescriptor> = tables.values().collect();
    let serialized =
        serde_json::to_string(&(levels, settings, descriptors)).unwrap_or_default();
    format!("{:x}", md5::compute(serialized))
}

/// Validates `config`, orders `descriptors` by foreign-key dependency and
/// freezes the result into a plan.
///
/// A cycle is not an error: its members share a level and their
/// constraints are deferred. Only bad settings and dangling or duplicate
/// tables fail planning.
pub fn build_plan(
    descriptors: &[TableDescriptor],
    config: &MigrationConfig,
) -> Result<MigrationPlan, ConfigError> {
    validate_config(config)?;

    let graph = DependencyGraph::build(descriptors)?;
    let (levels, cycles) = graph.order().into_parts();

    let mut deferred_constraints: BTreeSet<QualifiedName> =
        cycles.iter().flatten().cloned().collect();
    deferred_constraints.extend(graph.self_referencing().iter().cloned());

    for cycle in &cycles {
        let members = cycle
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        warn!(tables = %members, "Foreign-key cycle detected; constraints will be applied after load");
    }

    let levels: Vec<PlanLevel> = levels
        .into_iter()
        .enumerate()
        .map(|(index, tables)| PlanLevel { index, tables })
        .collect();

    let tables = graph.tables().clone();
    let fingerprint = compute_fingerprint(&levels, config, &tables);

    info!(
        tables = tables.len(),
        levels = levels.len(),
        cycles = cycles.len(),
        fingerprint = %fingerprint,
        "Migration plan built"
    );

    Ok(MigrationPlan {
        levels,
        settings: config.clone(),
        cycles,
        deferred_constraints,
        tables,
        fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::catalog::sample::hr_sales_catalog;

    fn name(s: &str) -> QualifiedName {
        s.parse().unwrap()
    }

    fn level_names(plan: &MigrationPlan) -> Vec<Vec<String>> {
        plan.levels
            .iter()
            .map(|l| l.tables.iter().map(ToString::to_string).collect())
            .collect()
    }

    fn departments_and_employees() -> Vec<TableDescriptor> {
        vec![
            TableDescriptor::new(name("HR.EMPLOYEES"))
                .with_primary_key(["EMPLOYEE_ID"])
                .with_foreign_key("DEPARTMENT_ID", name("HR.DEPARTMENTS"), "DEPARTMENT_ID")
                .with_estimated_rows(107),
            TableDescriptor::new(name("HR.DEPARTMENTS"))
                .with_primary_key(["DEPARTMENT_ID"])
                .with_estimated_rows(27),
        ]
    }

    #[test]
    fn departments_precede_employees() {
        let config = MigrationConfig {
            batch_size: 50,
            max_parallel: 2,
            max_retries: 1,
            ..Default::default()
        };
        let plan = build_plan(&departments_and_employees(), &config).unwrap();

        assert_eq!(
            level_names(&plan),
            vec![vec!["HR.DEPARTMENTS"], vec!["HR.EMPLOYEES"]]
        );
        assert_eq!(plan.settings.batch_size, 50);
        assert_eq!(plan.total_estimated_rows(), 134);
        assert!(!plan.is_cyclic());
    }

    #[test]
    fn building_twice_yields_the_same_plan() {
        let config = MigrationConfig::default();
        let first = build_plan(&hr_sales_catalog(), &config).unwrap();
        let second = build_plan(&hr_sales_catalog(), &config).unwrap();

        assert_eq!(first.levels, second.levels);
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_settings() {
        let first = build_plan(&hr_sales_catalog(), &MigrationConfig::default()).unwrap();
        let second = build_plan(
            &hr_sales_catalog(),
            &MigrationConfig {
                batch_size: 10,
                ..Default::default()
            },
        )
        .unwrap();

        assert_ne!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn sample_catalog_levels_and_deferred_self_reference() {
        let plan = build_plan(&hr_sales_catalog(), &MigrationConfig::default()).unwrap();

        assert_eq!(
            level_names(&plan),
            vec![
                vec!["HR.DEPARTMENTS", "HR.JOBS", "SALES.CUSTOMERS"],
                vec!["HR.EMPLOYEES", "SALES.ORDERS"],
                vec!["SALES.ORDER_ITEMS"],
            ]
        );
        assert!(plan.is_deferred(&name("HR.EMPLOYEES")));
        assert!(!plan.is_cyclic());
        assert_eq!(plan.level_of(&name("SALES.ORDER_ITEMS")), Some(2));
    }

    #[test]
    fn cycle_members_share_a_level_and_are_deferred() {
        let tables = vec![
            TableDescriptor::new(name("S.A")).with_foreign_key("B_ID", name("S.B"), "ID"),
            TableDescriptor::new(name("S.B")).with_foreign_key("A_ID", name("S.A"), "ID"),
        ];
        let plan = build_plan(&tables, &MigrationConfig::default()).unwrap();

        assert!(plan.is_cyclic());
        assert_eq!(plan.cycles, vec![vec![name("S.A"), name("S.B")]]);
        assert_eq!(plan.level_of(&name("S.A")), plan.level_of(&name("S.B")));
        assert!(plan.is_deferred(&name("S.A")) && plan.is_deferred(&name("S.B")));
    }

    #[test]
    fn dependents_are_transitive() {
        let plan = build_plan(&hr_sales_catalog(), &MigrationConfig::default()).unwrap();

        let dependents = plan.dependents_of(&name("SALES.CUSTOMERS"));
        assert_eq!(
            dependents.into_iter().collect::<Vec<_>>(),
            vec![name("SALES.ORDERS"), name("SALES.ORDER_ITEMS")]
        );
        assert!(plan.dependents_of(&name("HR.EMPLOYEES")).is_empty());
    }

    #[test]
    fn invalid_settings_fail_before_ordering() {
        let config = MigrationConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert_eq!(
            build_plan(&departments_and_employees(), &config),
            Err(ConfigError::InvalidBatchSize(0))
        );
    }

    #[test]
    fn dangling_reference_fails_planning() {
        let tables = vec![departments_and_employees().remove(0)];
        assert!(matches!(
            build_plan(&tables, &MigrationConfig::default()),
            Err(ConfigError::DanglingForeignKey { .. })
        ));
    }
}
