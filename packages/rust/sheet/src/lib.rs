//! Spreadsheet transport: the seam between the enrichment pipeline and
//! wherever the rows actually live.
//!
//! Two local implementations ship with the crate: [`MemorySheet`] for tests
//! and embedding, and [`JsonSheet`] for a sheet exported to a JSON file.

mod json;
mod memory;

use async_trait::async_trait;
use linkintel_shared::Result;
use serde::{Deserialize, Serialize};

pub use json::JsonSheet;
pub use memory::MemorySheet;

/// Header plus data rows. Row `i` here is sheet row `i + 2` (the header is row 1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetData {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetData {
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { header, rows }
    }

    /// Cell value, empty when the row is short or missing.
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map_or("", String::as_str)
    }

    /// Insert `names` into the header at `at`, shifting existing cells right.
    pub fn insert_columns(&mut self, at: usize, names: &[String]) {
        if self.header.len() < at {
            self.header.resize(at, String::new());
        }
        self.header.splice(at..at, names.iter().cloned());

        for row in &mut self.rows {
            if row.len() > at {
                row.splice(at..at, std::iter::repeat_n(String::new(), names.len()));
            }
        }
    }

    /// Apply one row update. Rows are padded to reach the written columns.
    pub fn apply(&mut self, update: &RowUpdate) -> Result<()> {
        let len = self.rows.len();
        let row = self.rows.get_mut(update.row).ok_or_else(|| {
            linkintel_shared::LinkIntelError::Sheet(format!(
                "row {} out of range ({len} rows)",
                update.row
            ))
        })?;
        for (column, value) in &update.cells {
            if row.len() <= *column {
                row.resize(column + 1, String::new());
            }
            row[*column] = value.clone();
        }
        Ok(())
    }
}

/// Cells to write into one row, applied as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowUpdate {
    /// Zero-based data row index (sheet row minus 2).
    pub row: usize,
    /// Row key the writer expects at this position.
    pub expected_key: String,
    /// `(column index, value)` pairs.
    pub cells: Vec<(usize, String)>,
}

/// Read/write access to a sheet.
///
/// Implementations must apply each [`RowUpdate`] atomically: either every cell
/// lands or none does.
#[async_trait]
pub trait SheetTransport: Send + Sync {
    async fn read_header(&self) -> Result<Vec<String>>;

    /// Header plus all data rows.
    async fn read_rows(&self) -> Result<SheetData>;

    /// Insert header cells at column `at`; existing columns at or right of `at` shift right.
    async fn insert_columns(&self, at: usize, names: &[String]) -> Result<()>;

    async fn write_row(&self, update: &RowUpdate) -> Result<()>;

    /// Write several rows. The default applies them one at a time.
    async fn write_rows(&self, updates: &[RowUpdate]) -> Result<()> {
        for update in updates {
            self.write_row(update).await?;
        }
        Ok(())
    }
}
