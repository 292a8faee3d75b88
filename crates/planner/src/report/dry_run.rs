use crate::{
    plan::MigrationPlan,
    report::finding::{Finding, Severity},
};
use chrono::{DateTime, Utc};
use model::{
    config::{ConflictPolicy, TransactionMode},
    core::identifiers::QualifiedName,
};
use serde::Serialize;

/// The overall status of the validation run.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub enum DryRunStatus {
    #[default]
    Success,
    SuccessWithWarnings,
    Failure,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableEstimate {
    pub table: QualifiedName,
    pub destination: QualifiedName,
    pub level: usize,
    pub estimated_rows: u64,
    pub batches: u64,
    pub deferred_constraints: bool,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DryRunSummary {
    pub status: DryRunStatus,
    pub timestamp: DateTime<Utc>,
    pub tables: usize,
    pub levels: usize,
    pub estimated_rows: u64,
    pub estimated_batches: u64,
    pub conflict_policy: ConflictPolicy,
    pub transaction_mode: TransactionMode,
}

/// What a run of `plan` would do, without touching either database.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DryRunReport {
    pub plan_hash: String,
    pub summary: DryRunSummary,
    pub tables: Vec<TableEstimate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
}

impl DryRunReport {
    pub fn has_warnings(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.severity >= Severity::Warning)
    }
}

pub fn dry_run(plan: &MigrationPlan) -> DryRunReport {
    let batch_size = plan.settings.batch_size.max(1) as u64;
    let mut tables = Vec::with_capacity(plan.table_count());
    let mut findings: Vec<Finding> = plan
        .cycles
        .iter()
        .map(|cycle| Finding::new_cycle_detected(cycle))
        .collect();

    for level in &plan.levels {
        for name in &level.tables {
            let Some(descriptor) = plan.table(name) else {
                continue;
            };

            let batches = descriptor.estimated_rows.div_ceil(batch_size);
            let destination = descriptor.destination_name();

            if descriptor.is_self_referencing() {
                findings.push(Finding::new_self_reference(name));
            }
            if !descriptor.has_primary_key() {
                findings.push(Finding::new_missing_primary_key(name));
            }
            match batches {
                0 => findings.push(Finding::new_empty_table(name)),
                1 => findings.push(Finding::new_single_batch(name)),
                _ => {}
            }
            if destination != *name {
                findings.push(Finding::new_destination_override(name, &destination));
            }

            tables.push(TableEstimate {
                table: name.clone(),
                destination,
                level: level.index,
                estimated_rows: descriptor.estimated_rows,
                batches,
                deferred_constraints: plan.is_deferred(name),
            });
        }
    }

    let status = if findings.iter().any(|f| f.severity == Severity::Error) {
        DryRunStatus::Failure
    } else if findings.iter().any(|f| f.severity == Severity::Warning) {
        DryRunStatus::SuccessWithWarnings
    } else {
        DryRunStatus::Success
    };

    DryRunReport {
        plan_hash: plan.fingerprint().to_string(),
        summary: DryRunSummary {
            status,
            timestamp: Utc::now(),
            tables: tables.len(),
            levels: plan.levels.len(),
            estimated_rows: plan.total_estimated_rows(),
            estimated_batches: tables.iter().map(|t| t.batches).sum(),
            conflict_policy: plan.settings.conflict_policy,
            transaction_mode: plan.settings.transaction_mode,
        },
        tables,
        findings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::build_plan;
    use model::{
        catalog::{sample::hr_sales_catalog, table::TableDescriptor},
        config::MigrationConfig,
    };

    #[test]
    fn sample_catalog_estimates_batches_per_table() {
        let config = MigrationConfig {
            batch_size: 100,
            ..Default::default()
        };
        let plan = build_plan(&hr_sales_catalog(), &config).unwrap();
        let report = dry_run(&plan);

        assert_eq!(report.summary.status, DryRunStatus::Success);
        assert_eq!(report.summary.tables, 6);
        assert_eq!(report.summary.estimated_rows, 1242);

        let items = report
            .tables
            .iter()
            .find(|t| t.table.to_string() == "SALES.ORDER_ITEMS")
            .unwrap();
        assert_eq!(items.batches, 7);
        assert_eq!(items.level, 2);

        let employees = report
            .tables
            .iter()
            .find(|t| t.table.to_string() == "HR.EMPLOYEES")
            .unwrap();
        assert!(employees.deferred_constraints);
        assert!(report.findings.iter().any(|f| f.code == "SELF_REFERENCE"));
        assert!(report
            .findings
            .iter()
            .any(|f| f.message == "Table `HR.JOBS` will be migrated in 1 batch"));
    }

    #[test]
    fn cycles_and_missing_keys_are_warnings() {
        let a: QualifiedName = "S.A".parse().unwrap();
        let b: QualifiedName = "S.B".parse().unwrap();
        let tables = vec![
            TableDescriptor::new(a.clone())
                .with_foreign_key("B_ID", b.clone(), "ID")
                .with_estimated_rows(10),
            TableDescriptor::new(b)
                .with_primary_key(["ID"])
                .with_foreign_key("A_ID", a, "ID")
                .with_estimated_rows(10),
        ];
        let plan = build_plan(&tables, &MigrationConfig::default()).unwrap();
        let report = dry_run(&plan);

        assert_eq!(report.summary.status, DryRunStatus::SuccessWithWarnings);
        assert!(report.has_warnings());
        assert!(report.findings.iter().any(|f| f.code == "CYCLE_DETECTED"));
        assert!(report.findings.iter().any(|f| f.code == "MISSING_PRIMARY_KEY"));
    }
}
