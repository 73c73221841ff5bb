use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Range;

/// Monotonic counter marking the backend's notion of "current data
/// snapshot".
///
/// Bumped by the invalidation controller whenever the backend signals that
/// the underlying data changed (sort, filter, external mutation). All cache
/// entries are implicitly scoped to the version current at the time they
/// were populated; a bump invalidates prior entries lazily, by comparison on
/// read, never by sweeping.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DataVersion(u64);

impl DataVersion {
    pub fn bump(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// The currently visible row/column window plus which columns have their
/// profile panel expanded.
///
/// Mutated exclusively by the grid controller in response to scroll, resize,
/// and expand events; read by the window manager to compute the fetch set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Viewport {
    pub first_row: usize,
    pub row_count: usize,
    pub first_column: usize,
    pub column_count: usize,
    pub expanded_columns: BTreeSet<usize>,
}

impl Viewport {
    pub fn new(first_row: usize, row_count: usize, first_column: usize, column_count: usize) -> Self {
        Self {
            first_row,
            row_count,
            first_column,
            column_count,
            expanded_columns: BTreeSet::new(),
        }
    }

    /// Visible rows as a half-open range.
    pub fn rows(&self) -> Range<usize> {
        self.first_row..self.first_row.saturating_add(self.row_count)
    }

    /// Visible columns as a half-open range.
    pub fn columns(&self) -> Range<usize> {
        self.first_column..self.first_column.saturating_add(self.column_count)
    }

    pub fn contains_row(&self, row: usize) -> bool {
        self.rows().contains(&row)
    }

    pub fn contains_column(&self, column: usize) -> bool {
        self.columns().contains(&column)
    }

    pub fn is_expanded(&self, column: usize) -> bool {
        self.expanded_columns.contains(&column)
    }
}
