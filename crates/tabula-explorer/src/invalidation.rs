//! Consumes backend change notifications and evicts selectively.
//!
//! Schema changes are the nuclear case: column identity itself is suspect,
//! so schema, capabilities, profiles, and cells are all discarded in one
//! lock scope. Data changes only bump the version; entries from prior
//! versions become stale by comparison and are refetched lazily, on their
//! next read, never by an eager sweep. The schema and the capability
//! descriptor describe columns rather than rows, so a data change leaves
//! them fresh.

use crate::cache::{CacheEntry, CacheKey};
use crate::coordinator;
use crate::notify::EntryPhase;
use crate::state::{Shared, State};
use crate::viewport;
use std::sync::Arc;
use tabula_comm::BackendEventStream;
use tabula_model::BackendEvent;

/// Pump backend events into the session until the stream or session ends.
pub(crate) async fn run_event_pump(shared: Arc<Shared>, mut events: BackendEventStream) {
    while let Some((table, event)) = events.recv().await {
        if table != shared.table {
            continue;
        }
        let mut state = shared.lock_state();
        if state.closed {
            break;
        }
        handle_event(&shared, &mut state, event);
    }
}

pub(crate) fn handle_event(shared: &Arc<Shared>, state: &mut State, event: BackendEvent) {
    match event {
        BackendEvent::SchemaChanged => on_schema_changed(state),
        BackendEvent::DataChanged => on_data_changed(state),
        BackendEvent::Busy(busy) => on_busy(shared, state, busy),
    }
}

/// Everything keyed by column identity goes at once; no partial state where
/// the schema is new but profiles describe the old columns.
fn on_schema_changed(state: &mut State) {
    tracing::debug!("schema changed; discarding all caches");
    state.data_version.bump();
    coordinator::cancel_all(state);

    state.schema = CacheEntry::default();
    state.capabilities = CacheEntry::default();
    state.profiles.clear();
    state.cells.clear();
    state.deferred_profiles.clear();

    state.notify_phase(CacheKey::Schema, EntryPhase::Invalidated);
    state.notify_phase(CacheKey::Capabilities, EntryPhase::Invalidated);
}

/// Version bump only. In-flight data responses are superseded (their
/// generation no longer matches), and their pending markers roll back so
/// the next read of each key triggers exactly one refetch. Schema and
/// capabilities describe column identity, not row data: they are re-stamped
/// to the new version so header reads keep hitting the cache until a
/// schema-change event.
fn on_data_changed(state: &mut State) {
    tracing::debug!(
        version = state.data_version.as_u64() + 1,
        "data changed; entries stale by version"
    );
    state.data_version.bump();
    let data_keys: Vec<CacheKey> = state
        .in_flight
        .iter()
        .copied()
        .filter(|key| !matches!(key, CacheKey::Schema | CacheKey::Capabilities))
        .collect();
    for key in data_keys {
        coordinator::cancel(state, key);
    }
    let version = state.data_version;
    state.schema.data_version = version;
    state.capabilities.data_version = version;
}

fn on_busy(shared: &Arc<Shared>, state: &mut State, busy: bool) {
    state.busy = busy;
    if !busy {
        viewport::release_deferred(shared, state);
    }
}
