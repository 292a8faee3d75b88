//! The HR / SALES demo schema used by the migration wizard.

use crate::{catalog::table::TableDescriptor, core::identifiers::QualifiedName};

fn hr(table: &str) -> QualifiedName {
    QualifiedName::new("HR", table)
}

fn sales(table: &str) -> QualifiedName {
    QualifiedName::new("SALES", table)
}

pub fn hr_sales_catalog() -> Vec<TableDescriptor> {
    vec![
        TableDescriptor::new(hr("DEPARTMENTS"))
            .with_primary_key(["DEPARTMENT_ID"])
            .with_estimated_rows(27),
        TableDescriptor::new(hr("JOBS"))
            .with_primary_key(["JOB_ID"])
            .with_estimated_rows(19),
        TableDescriptor::new(hr("EMPLOYEES"))
            .with_primary_key(["EMPLOYEE_ID"])
            .with_foreign_key("DEPARTMENT_ID", hr("DEPARTMENTS"), "DEPARTMENT_ID")
            .with_foreign_key("JOB_ID", hr("JOBS"), "JOB_ID")
            .with_foreign_key("MANAGER_ID", hr("EMPLOYEES"), "EMPLOYEE_ID")
            .with_estimated_rows(107),
        TableDescriptor::new(sales("CUSTOMERS"))
            .with_primary_key(["CUSTOMER_ID"])
            .with_estimated_rows(319),
        TableDescriptor::new(sales("ORDERS"))
            .with_primary_key(["ORDER_ID"])
            .with_foreign_key("CUSTOMER_ID", sales("CUSTOMERS"), "CUSTOMER_ID")
            .with_estimated_rows(105),
        TableDescriptor::new(sales("ORDER_ITEMS"))
            .with_primary_key(["ORDER_ID", "LINE_ITEM_ID"])
            .with_foreign_key("ORDER_ID", sales("ORDERS"), "ORDER_ID")
            .with_estimated_rows(665),
    ]
}
