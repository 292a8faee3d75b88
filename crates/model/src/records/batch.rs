use crate::{pagination::cursor::Cursor, records::row::RowData};

#[derive(Debug, Clone)]
pub struct Batch {
    /// Zero-based position of this batch within its table.
    pub index: u64,
    pub rows: Vec<RowData>,
    pub cursor: Cursor, // position this batch was read from
    pub next: Cursor,   // resume-from position (end of this batch)
    pub ts: chrono::DateTime<chrono::Utc>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
