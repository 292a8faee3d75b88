//! Deterministic synthetic rows for catalog tables.
//!
//! Row `i` (zero based) of a table gets `i + 1` in every primary-key column
//! that is not also a foreign key. Foreign-key columns cycle through the
//! parent's key range `1..=parent.estimated_rows`, so children generated
//! from the same catalog always reference existing parents. Self
//! references point at an earlier row, or are NULL for the first one.

use model::{
    catalog::table::TableDescriptor,
    core::{identifiers::QualifiedName, value::Value},
    records::row::{FieldValue, RowData},
};
use std::collections::HashMap;

pub fn rows_for(table: &TableDescriptor, catalog: &[TableDescriptor]) -> Vec<RowData> {
    let sizes: HashMap<&QualifiedName, u64> = catalog
        .iter()
        .map(|t| (&t.name, t.estimated_rows))
        .collect();

    (0..table.estimated_rows)
        .map(|i| generate_row(table, i, &sizes))
        .collect()
}

fn generate_row(table: &TableDescriptor, i: u64, sizes: &HashMap<&QualifiedName, u64>) -> RowData {
    let mut fields: Vec<FieldValue> = Vec::new();

    for fk in &table.foreign_keys {
        let value = if fk.references == table.name {
            if i == 0 {
                Value::Null
            } else {
                Value::Int((i / 2 + 1) as i64)
            }
        } else {
            match sizes.get(&fk.references).copied() {
                Some(0) | None => Value::Null,
                Some(parent_rows) => Value::Int((i % parent_rows + 1) as i64),
            }
        };

        for column in &fk.columns {
            set(&mut fields, column, value.clone());
        }
    }

    for column in &table.primary_key {
        set(&mut fields, column, Value::Int(i as i64 + 1));
    }

    set(
        &mut fields,
        "LABEL",
        Value::Text(format!("{}-{}", table.name.table, i + 1)),
    );

    RowData::new(fields)
}

/// First writer wins: a column shared by a key and a foreign key keeps the FK value.
fn set(fields: &mut Vec<FieldValue>, column: &str, value: Value) {
    if !fields.iter().any(|f| f.name.eq_ignore_ascii_case(column)) {
        fields.push(FieldValue::new(column, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::catalog::sample::hr_sales_catalog;

    fn find<'a>(catalog: &'a [TableDescriptor], name: &str) -> &'a TableDescriptor {
        catalog.iter().find(|t| t.name.to_string() == name).unwrap()
    }

    #[test]
    fn generates_estimated_row_count_with_unique_keys() {
        let catalog = hr_sales_catalog();
        let items = find(&catalog, "SALES.ORDER_ITEMS");
        let rows = rows_for(items, &catalog);

        assert_eq!(rows.len(), 665);
        let mut keys: Vec<_> = rows.iter().map(|r| r.key(&items.primary_key).unwrap()).collect();
        keys.dedup();
        assert_eq!(keys.len(), 665);
    }

    #[test]
    fn foreign_keys_stay_within_parent_range() {
        let catalog = hr_sales_catalog();
        let employees = find(&catalog, "HR.EMPLOYEES");
        let rows = rows_for(employees, &catalog);

        for row in &rows {
            let department = row.get_value("DEPARTMENT_ID").as_i64().unwrap();
            assert!((1..=27).contains(&department));
        }
        assert!(rows[0].get_value("MANAGER_ID").is_null());
        assert_eq!(rows[5].get_value("MANAGER_ID"), Value::Int(3));
    }
}
