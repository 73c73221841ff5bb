//! Cache-and-coordinate client for the connections pane.
//!
//! Same discipline as the grid coordinator, minus the viewport: one cache
//! entry per `(path, op)`, at most one in-flight fetch per entry, responses
//! applied only under a matching generation. Invalidation is explicit:
//! `refresh(path)` marks the path and everything beneath it stale and
//! cancels their in-flight fetches.

use crate::cache::{CacheEntry, EntryStatus, FailureCause, Snapshot};
use crate::state::SyncStats;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tabula_comm::{CommError, SharedBackend};
use tabula_model::{DataChunk, FieldEntry, ObjectEntry, ObjectPath};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, trace};

/// The backend operations the pane issues against one object path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionsOp {
    ListObjects,
    ListFields,
    ContainsData,
    GetIcon,
    PreviewObject,
}

/// Result payload of one connections fetch, matching its op.
#[derive(Clone, Debug)]
pub enum ConnectionsValue {
    Objects(Vec<ObjectEntry>),
    Fields(Vec<FieldEntry>),
    ContainsData(bool),
    Icon(Option<String>),
    Preview(Arc<DataChunk>),
}

type ConnKey = (ObjectPath, ConnectionsOp);

struct ConnState {
    /// Bumped per refreshed subtree root; entries outside the subtree are
    /// re-stamped so only the refreshed ones read stale.
    version: tabula_model::DataVersion,
    entries: HashMap<ConnKey, CacheEntry<ConnectionsValue>>,
    generations: HashMap<ConnKey, u64>,
    in_flight: HashSet<ConnKey>,
    stats: SyncStats,
}

struct ConnInner {
    backend: SharedBackend,
    fetch_timeout: Duration,
    state: Mutex<ConnState>,
    /// Bumped whenever any entry settles or is invalidated; the pane
    /// re-reads whatever it is showing on each tick.
    epoch: watch::Sender<u64>,
}

impl ConnInner {
    fn lock_state(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().expect("connections state mutex poisoned")
    }

    fn tick(&self) {
        self.epoch.send_modify(|epoch| *epoch += 1);
    }
}

/// Handle for the connections pane. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionsClient {
    inner: Arc<ConnInner>,
}

impl ConnectionsClient {
    pub fn new(backend: SharedBackend, fetch_timeout: Duration) -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            inner: Arc::new(ConnInner {
                backend,
                fetch_timeout,
                state: Mutex::new(ConnState {
                    version: tabula_model::DataVersion::default(),
                    entries: HashMap::new(),
                    generations: HashMap::new(),
                    in_flight: HashSet::new(),
                    stats: SyncStats::default(),
                }),
                epoch,
            }),
        }
    }

    /// A receiver that changes value whenever any cached entry settles or
    /// is refreshed.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.epoch.subscribe()
    }

    pub fn objects_state(&self, path: &ObjectPath) -> Snapshot<Vec<ObjectEntry>> {
        self.read(path, ConnectionsOp::ListObjects, |value| match value {
            ConnectionsValue::Objects(entries) => Some(entries),
            _ => None,
        })
    }

    pub fn fields_state(&self, path: &ObjectPath) -> Snapshot<Vec<FieldEntry>> {
        self.read(path, ConnectionsOp::ListFields, |value| match value {
            ConnectionsValue::Fields(fields) => Some(fields),
            _ => None,
        })
    }

    pub fn contains_data_state(&self, path: &ObjectPath) -> Snapshot<bool> {
        self.read(path, ConnectionsOp::ContainsData, |value| match value {
            ConnectionsValue::ContainsData(flag) => Some(flag),
            _ => None,
        })
    }

    pub fn icon_state(&self, path: &ObjectPath) -> Snapshot<Option<String>> {
        self.read(path, ConnectionsOp::GetIcon, |value| match value {
            ConnectionsValue::Icon(icon) => Some(icon),
            _ => None,
        })
    }

    pub fn preview_state(&self, path: &ObjectPath) -> Snapshot<Arc<DataChunk>> {
        self.read(path, ConnectionsOp::PreviewObject, |value| match value {
            ConnectionsValue::Preview(chunk) => Some(chunk),
            _ => None,
        })
    }

    /// Mark `path` and every path beneath it stale; cached values keep
    /// showing until their next read triggers the refetch.
    pub fn refresh(&self, path: &ObjectPath) {
        let mut state = self.inner.lock_state();
        state.version.bump();
        let current = state.version;
        let refreshed: Vec<ConnKey> = state
            .entries
            .keys()
            .filter(|(entry_path, _)| entry_path.starts_with(path))
            .cloned()
            .collect();
        // Untouched subtrees stay fresh under the new version.
        for (key, entry) in state.entries.iter_mut() {
            if !key.0.starts_with(path) {
                entry.data_version = current;
            }
        }
        for key in refreshed {
            if state.in_flight.remove(&key) {
                state.stats.cancellations += 1;
                let next = state.generations.entry(key.clone()).or_insert(0);
                *next += 1;
                if let Some(entry) = state.entries.get_mut(&key) {
                    entry.rollback();
                }
            }
        }
        debug!(%path, "connections subtree refreshed");
        drop(state);
        self.inner.tick();
    }

    pub fn stats_snapshot(&self) -> SyncStats {
        self.inner.lock_state().stats
    }

    fn read<T, F>(&self, path: &ObjectPath, op: ConnectionsOp, extract: F) -> Snapshot<T>
    where
        F: Fn(ConnectionsValue) -> Option<T>,
    {
        let mut state = self.inner.lock_state();
        let version = state.version;
        let key = (path.clone(), op);
        let needs = state
            .entries
            .get(&key)
            .map(|entry| entry.needs_fetch(version))
            .unwrap_or(true);
        if needs && !state.in_flight.contains(&key) {
            self.request(&mut state, key.clone());
        }
        let snapshot = state
            .entries
            .get(&key)
            .map(|entry| entry.snapshot(version))
            .unwrap_or(Snapshot {
                value: None,
                status: EntryStatus::NotRequested,
                stale: false,
            });
        Snapshot {
            value: snapshot.value.and_then(extract),
            status: snapshot.status,
            stale: snapshot.stale,
        }
    }

    fn request(&self, state: &mut ConnState, key: ConnKey) {
        let generation = {
            let slot = state.generations.entry(key.clone()).or_insert(0);
            *slot += 1;
            *slot
        };
        state.in_flight.insert(key.clone());
        state
            .entries
            .entry(key.clone())
            .or_default()
            .begin_pending(generation);
        state.stats.fetches_issued += 1;
        trace!(path = %key.0, op = ?key.1, generation, "fetching connections entry");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let (path, op) = (key.0.clone(), key.1);
            let call = fetch(&inner.backend, path, op);
            let outcome = timeout(inner.fetch_timeout, call).await;
            apply(&inner, key, generation, outcome);
        });
    }
}

async fn fetch(
    backend: &SharedBackend,
    path: ObjectPath,
    op: ConnectionsOp,
) -> Result<ConnectionsValue, CommError> {
    match op {
        ConnectionsOp::ListObjects => backend
            .list_objects(path)
            .await
            .map(ConnectionsValue::Objects),
        ConnectionsOp::ListFields => backend
            .list_fields(path)
            .await
            .map(ConnectionsValue::Fields),
        ConnectionsOp::ContainsData => backend
            .contains_data(path)
            .await
            .map(ConnectionsValue::ContainsData),
        ConnectionsOp::GetIcon => backend.get_icon(path).await.map(ConnectionsValue::Icon),
        ConnectionsOp::PreviewObject => backend
            .preview_object(path)
            .await
            .map(|chunk| ConnectionsValue::Preview(Arc::new(chunk))),
    }
}

fn apply(
    inner: &Arc<ConnInner>,
    key: ConnKey,
    generation: u64,
    outcome: Result<Result<ConnectionsValue, CommError>, tokio::time::error::Elapsed>,
) {
    let mut state = inner.lock_state();
    if state.generations.get(&key).copied().unwrap_or(0) != generation {
        state.stats.responses_discarded += 1;
        trace!(path = %key.0, op = ?key.1, "discarding superseded connections response");
        return;
    }
    state.in_flight.remove(&key);
    let version = state.version;
    let settled = match outcome {
        Ok(Ok(value)) => {
            state.stats.responses_applied += 1;
            Ok(value)
        }
        Ok(Err(err)) => Err(FailureCause::from_comm(&err)),
        Err(_) => {
            state.stats.timeouts += 1;
            Err(FailureCause::Timeout)
        }
    };
    if let Some(entry) = state.entries.get_mut(&key) {
        match settled {
            Ok(value) => entry.complete(value, version, generation),
            Err(cause) => entry.fail(cause, generation),
        }
    }
    drop(state);
    inner.tick();
}
