pub mod sample;
pub mod table;

pub use table::{ForeignKey, TableDescriptor};

/// Parses a schema catalog (a JSON array of table descriptors).
pub fn from_json(raw: &str) -> Result<Vec<TableDescriptor>, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Renders a schema catalog as pretty-printed JSON.
pub fn to_json(tables: &[TableDescriptor]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(tables)
}
