use crate::core::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resume position of a batch extractor.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub enum Cursor {
    /// Nothing read yet.
    #[default]
    Start,

    /// Rows already consumed, for tables without a primary key.
    Offset { rows: u64 },

    /// Primary key of the last row consumed (strictly increasing).
    Key { values: Vec<Value> },
}

impl Cursor {
    pub fn is_start(&self) -> bool {
        matches!(self, Cursor::Start)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Start => f.write_str("start"),
            Cursor::Offset { rows } => write!(f, "offset {rows}"),
            Cursor::Key { values } => {
                let parts: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "key ({})", parts.join(", "))
            }
        }
    }
}
