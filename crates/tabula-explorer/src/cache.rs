use tabula_comm::CommError;
use tabula_model::{DataVersion, ProfileKind};

/// Why a cache entry is in the `Failed` state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureCause {
    /// The fetch did not resolve within the configured interval.
    Timeout,
    /// The backend rejected the request, with its reason.
    Backend(String),
    /// The channel itself failed (closed, serialization).
    Transport(String),
}

impl FailureCause {
    pub(crate) fn from_comm(err: &CommError) -> Self {
        match err {
            CommError::ChannelClosed => FailureCause::Transport("comm channel closed".to_string()),
            CommError::Serialization(err) => FailureCause::Transport(err.to_string()),
            CommError::Backend(reason) => FailureCause::Backend(reason.clone()),
            CommError::Cancelled => FailureCause::Transport("request cancelled".to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryStatus {
    NotRequested,
    Pending,
    Ready,
    Failed(FailureCause),
}

/// One memoized fetch result.
///
/// `data_version` records the table version current when the value was
/// applied; an entry whose version is older than the table's current version
/// is logically stale even before anything evicts it. `generation` records
/// the request generation that last touched the entry (diagnostics only; the
/// authoritative generation lives in the session's per-key map).
#[derive(Clone, Debug)]
pub struct CacheEntry<T> {
    pub value: Option<T>,
    pub status: EntryStatus,
    pub data_version: DataVersion,
    pub generation: u64,
}

impl<T> Default for CacheEntry<T> {
    fn default() -> Self {
        Self {
            value: None,
            status: EntryStatus::NotRequested,
            data_version: DataVersion::default(),
            generation: 0,
        }
    }
}

impl<T> CacheEntry<T> {
    /// Ready under an older data version.
    pub fn is_stale(&self, current: DataVersion) -> bool {
        self.status == EntryStatus::Ready && self.data_version < current
    }

    /// Whether a read of this entry should issue a fetch: nothing yet, a
    /// stale value, or a failure with no retry already pending.
    pub(crate) fn needs_fetch(&self, current: DataVersion) -> bool {
        match self.status {
            EntryStatus::NotRequested => true,
            EntryStatus::Pending => false,
            EntryStatus::Ready => self.data_version < current,
            EntryStatus::Failed(_) => true,
        }
    }

    /// Mark a fetch as issued. The previous value is kept so readers still
    /// see the best known (stale) value while the refresh is in flight.
    pub(crate) fn begin_pending(&mut self, generation: u64) {
        self.status = EntryStatus::Pending;
        self.generation = generation;
    }

    pub(crate) fn complete(&mut self, value: T, version: DataVersion, generation: u64) {
        self.value = Some(value);
        self.status = EntryStatus::Ready;
        self.data_version = version;
        self.generation = generation;
    }

    pub(crate) fn fail(&mut self, cause: FailureCause, generation: u64) {
        self.status = EntryStatus::Failed(cause);
        self.generation = generation;
    }

    /// Undo a pending marker after its request was cancelled or superseded:
    /// back to the prior value (stale by version) or to untouched.
    pub(crate) fn rollback(&mut self) {
        self.status = if self.value.is_some() {
            EntryStatus::Ready
        } else {
            EntryStatus::NotRequested
        };
    }

    /// Non-blocking read: the best currently-known value plus its state.
    pub fn snapshot(&self, current: DataVersion) -> Snapshot<T>
    where
        T: Clone,
    {
        Snapshot {
            value: self.value.clone(),
            status: self.status.clone(),
            stale: self.data_version < current && self.value.is_some(),
        }
    }
}

/// Settled view of a cache entry handed to the rendering layer.
#[derive(Clone, Debug)]
pub struct Snapshot<T> {
    pub value: Option<T>,
    pub status: EntryStatus,
    /// The value (if any) predates the current data version. Renderers keep
    /// showing it for continuity while the refresh lands.
    pub stale: bool,
}

impl<T> Snapshot<T> {
    pub fn is_ready(&self) -> bool {
        self.status == EntryStatus::Ready
    }

    pub fn is_pending(&self) -> bool {
        self.status == EntryStatus::Pending
    }
}

/// Fixed-size cell tile coordinates: `block_row` indexes runs of
/// `rows_per_block` rows, `block_col` runs of `cols_per_block` columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    pub block_row: usize,
    pub block_col: usize,
}

/// Identity of one cached fetch for the open table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Schema,
    Capabilities,
    Profile { column: usize, kind: ProfileKind },
    Cells(BlockKey),
}
