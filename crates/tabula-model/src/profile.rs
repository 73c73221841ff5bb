use serde::{Deserialize, Serialize};

/// Kind of per-column statistical profile the backend can compute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    NullCount,
    SummaryStats,
    Histogram,
    FrequencyTable,
}

impl ProfileKind {
    pub const ALL: [ProfileKind; 4] = [
        ProfileKind::NullCount,
        ProfileKind::SummaryStats,
        ProfileKind::Histogram,
        ProfileKind::FrequencyTable,
    ];
}

/// Summary statistics for one column.
///
/// Values arrive pre-formatted: the backend knows the column's dtype and
/// locale, so this layer never reformats numbers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SummaryStats {
    pub min_value: Option<String>,
    pub max_value: Option<String>,
    pub mean: Option<String>,
    pub median: Option<String>,
    pub stdev: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Histogram {
    /// Formatted bin edges; `bin_edges.len() == bin_counts.len() + 1`.
    pub bin_edges: Vec<String>,
    pub bin_counts: Vec<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FrequencyTable {
    pub values: Vec<String>,
    pub counts: Vec<u64>,
    /// Rows not covered by `values` (the long tail).
    pub other_count: u64,
}

/// Result of one profile computation, tagged by the kind that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ProfileResult {
    NullCount(u64),
    SummaryStats(SummaryStats),
    Histogram(Histogram),
    FrequencyTable(FrequencyTable),
}

impl ProfileResult {
    /// The kind this result answers.
    pub fn kind(&self) -> ProfileKind {
        match self {
            ProfileResult::NullCount(_) => ProfileKind::NullCount,
            ProfileResult::SummaryStats(_) => ProfileKind::SummaryStats,
            ProfileResult::Histogram(_) => ProfileKind::Histogram,
            ProfileResult::FrequencyTable(_) => ProfileKind::FrequencyTable,
        }
    }
}

/// Maturity of the backend's support for one profile kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportStatus {
    Supported,
    Experimental,
    Unsupported,
}

impl SupportStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, SupportStatus::Supported | SupportStatus::Experimental)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProfileCapability {
    pub kind: ProfileKind,
    pub status: SupportStatus,
}

/// Backend-declared feature support, fetched once per table.
///
/// Treated as read-only configuration: the explorer consults it before
/// issuing profile requests and never revises it mid-session (a schema
/// change replaces it wholesale along with the schema).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BackendCapabilities {
    pub profiles: Vec<ProfileCapability>,
}

impl BackendCapabilities {
    /// Declare every profile kind with the same status. Test convenience.
    pub fn uniform(status: SupportStatus) -> Self {
        Self {
            profiles: ProfileKind::ALL
                .iter()
                .map(|&kind| ProfileCapability { kind, status })
                .collect(),
        }
    }

    /// Support status for `kind`; kinds the backend did not declare are
    /// unsupported.
    pub fn profile_status(&self, kind: ProfileKind) -> SupportStatus {
        self.profiles
            .iter()
            .find(|cap| cap.kind == kind)
            .map(|cap| cap.status)
            .unwrap_or(SupportStatus::Unsupported)
    }
}
