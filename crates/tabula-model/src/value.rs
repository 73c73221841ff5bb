use serde::{Deserialize, Serialize};
use std::fmt;

/// Formatted scalar shown in one grid cell.
///
/// The enum uses an explicit `{type, value}` tagged layout for stable IPC.
/// Only `Value` carries a payload; the remaining variants are the special
/// codes computational kernels distinguish from ordinary formatted output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    /// Ordinary formatted value, ready for display.
    Value(String),
    /// SQL NULL / missing value.
    Null,
    /// R's `NA`.
    NotAvailable,
    /// Floating-point NaN.
    NaN,
    /// Pandas `NaT` (not-a-time).
    NotATime,
    /// Python `None`.
    NoneValue,
    Infinity,
    NegInfinity,
    /// The backend could not produce a representation.
    Unknown,
}

impl CellValue {
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            CellValue::Null | CellValue::NotAvailable | CellValue::NotATime | CellValue::NoneValue
        )
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Value(s) => f.write_str(s),
            CellValue::Null => f.write_str("NULL"),
            CellValue::NotAvailable => f.write_str("NA"),
            CellValue::NaN => f.write_str("NaN"),
            CellValue::NotATime => f.write_str("NaT"),
            CellValue::NoneValue => f.write_str("None"),
            CellValue::Infinity => f.write_str("Inf"),
            CellValue::NegInfinity => f.write_str("-Inf"),
            CellValue::Unknown => f.write_str("?"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Value(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Value(value)
    }
}

/// One column's slice of a [`DataChunk`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ColumnChunk {
    pub column_index: usize,
    /// One entry per row of the requested range, in row order.
    pub values: Vec<CellValue>,
}

/// Result of a `get_data_values` call: a rectangular block of formatted
/// cells, column-major as the kernel returns it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DataChunk {
    /// Absolute row index of the first row in every column chunk.
    pub row_start: usize,
    pub columns: Vec<ColumnChunk>,
}

impl DataChunk {
    /// Look up a cell by absolute coordinates. Returns `None` when the
    /// coordinates fall outside the chunk.
    pub fn cell(&self, row: usize, column: usize) -> Option<&CellValue> {
        let offset = row.checked_sub(self.row_start)?;
        self.columns
            .iter()
            .find(|c| c.column_index == column)
            .and_then(|c| c.values.get(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_lookup_uses_absolute_coordinates() {
        let chunk = DataChunk {
            row_start: 100,
            columns: vec![ColumnChunk {
                column_index: 3,
                values: vec![CellValue::from("a"), CellValue::Null],
            }],
        };
        assert_eq!(chunk.cell(100, 3), Some(&CellValue::from("a")));
        assert_eq!(chunk.cell(101, 3), Some(&CellValue::Null));
        assert_eq!(chunk.cell(99, 3), None);
        assert_eq!(chunk.cell(102, 3), None);
        assert_eq!(chunk.cell(100, 4), None);
    }
}
