use serde::{Deserialize, Serialize};
use std::fmt;

/// Path addressing one node in a connection's object hierarchy
/// (e.g. `["catalog", "schema", "table"]`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectPath(pub Vec<String>);

impl ObjectPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.into());
        Self(segments)
    }

    /// True when `self` is `other` or a descendant of it.
    pub fn starts_with(&self, other: &ObjectPath) -> bool {
        self.0.len() >= other.0.len() && self.0[..other.0.len()] == other.0[..]
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

/// A child container or data object under an [`ObjectPath`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ObjectEntry {
    pub name: String,
    /// Backend-defined kind (e.g. `schema`, `table`, `view`).
    pub kind: String,
}

/// A field (column) of a data object in the connections pane.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FieldEntry {
    pub name: String,
    pub dtype: String,
}
