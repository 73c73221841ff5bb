use serde::{Deserialize, Serialize};

/// Notification pushed by the backend outside the request/response flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BackendEvent {
    /// Columns were added, removed, or retyped. Column identity is no longer
    /// trustworthy; schema and profiles must be replaced together.
    SchemaChanged,
    /// Row data changed under an unchanged schema (sort, filter, external
    /// mutation). Cached values become stale by version comparison.
    DataChanged,
    /// The backend is (or stopped being) busy with other work; a throttling
    /// hint, not a correctness signal.
    Busy(bool),
}
