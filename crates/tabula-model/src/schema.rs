use serde::{Deserialize, Serialize};
use std::fmt;

/// Rendering category for a column, as declared by the backend.
///
/// This is a closed set: dispatch sites in the explorer match exhaustively so
/// that adding a display type is a compiler-enforced change rather than a
/// silently-falling-through default branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDisplayType {
    Number,
    Boolean,
    String,
    Date,
    Datetime,
    Time,
    Interval,
    Object,
    Array,
    Struct,
    Unknown,
}

impl fmt::Display for ColumnDisplayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnDisplayType::Number => "number",
            ColumnDisplayType::Boolean => "boolean",
            ColumnDisplayType::String => "string",
            ColumnDisplayType::Date => "date",
            ColumnDisplayType::Datetime => "datetime",
            ColumnDisplayType::Time => "time",
            ColumnDisplayType::Interval => "interval",
            ColumnDisplayType::Object => "object",
            ColumnDisplayType::Array => "array",
            ColumnDisplayType::Struct => "struct",
            ColumnDisplayType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Metadata for a single column of the open table.
///
/// One `Vec<ColumnSchema>` exists per table and is replaced wholesale on a
/// schema-change notification; partial updates are not supported, to avoid
/// index-shift bugs when columns are added or removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ColumnSchema {
    /// Zero-based position of the column in the table.
    pub column_index: usize,
    pub column_name: String,
    /// The backend's own type name (e.g. `float64`, `VARCHAR`), for display.
    pub type_name: String,
    pub display_type: ColumnDisplayType,
}

impl ColumnSchema {
    pub fn new(
        column_index: usize,
        column_name: impl Into<String>,
        type_name: impl Into<String>,
        display_type: ColumnDisplayType,
    ) -> Self {
        Self {
            column_index,
            column_name: column_name.into(),
            type_name: type_name.into(),
            display_type,
        }
    }
}
