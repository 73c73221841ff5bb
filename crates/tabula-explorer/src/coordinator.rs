//! Issues, deduplicates, and cancels the session's outstanding RPC calls.
//!
//! Invariant: at most one in-flight request per cache key. A second request
//! for a key with one pending attaches to the existing call. Every fetch
//! task re-locks the state on completion and applies its result only if the
//! key's generation still matches the one the fetch was issued under;
//! superseded responses are counted and dropped. Generations advance on
//! explicit cancellation, on a superseding request, and on data-version
//! bumps, so a slow early response can never clobber a fast later one.

use crate::cache::{BlockKey, CacheEntry, CacheKey, FailureCause};
use crate::notify::EntryPhase;
use crate::state::{block_cols, block_rows, Shared, State};
use crate::viewport;
use std::sync::Arc;
use tabula_comm::{CommError, ProfileReply, ProfileRequest};
use tabula_model::ProfileKind;
use tokio::time::timeout;

/// Outcome of a timed backend call.
type Fetched<T> = Result<Result<T, CommError>, tokio::time::error::Elapsed>;

/// Issue the schema fetch unless one is already pending.
pub(crate) fn request_schema(shared: &Arc<Shared>, state: &mut State) {
    let key = CacheKey::Schema;
    if state.in_flight.contains(&key) {
        return;
    }
    let generation = state.bump_generation(key);
    state.in_flight.insert(key);
    state.schema.begin_pending(generation);
    state.stats.fetches_issued += 1;
    state.notify_phase(key, EntryPhase::Pending);
    tracing::debug!(generation, "fetching schema");

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let call = shared.backend.get_schema(shared.table);
        let outcome = timeout(shared.config.fetch_timeout, call).await;
        apply_schema(&shared, generation, outcome);
    });
}

fn apply_schema(
    shared: &Arc<Shared>,
    generation: u64,
    outcome: Fetched<Vec<tabula_model::ColumnSchema>>,
) {
    let mut state = shared.lock_state();
    if state.closed {
        return;
    }
    let key = CacheKey::Schema;
    if state.generation(key) != generation {
        state.stats.responses_discarded += 1;
        tracing::trace!(generation, "discarding superseded schema response");
        return;
    }
    state.in_flight.remove(&key);
    match outcome {
        Ok(Ok(schema)) => {
            let version = state.data_version;
            state.schema.complete(Arc::new(schema), version, generation);
            state.stats.responses_applied += 1;
            state.notify_phase(key, EntryPhase::Ready);
            // Display types just became known; profile planning may now
            // produce fetches for already-expanded columns.
            viewport::recompute(shared, &mut state);
        }
        Ok(Err(err)) => {
            state.schema.fail(FailureCause::from_comm(&err), generation);
            state.notify_phase(key, EntryPhase::Failed);
        }
        Err(_) => {
            state.stats.timeouts += 1;
            state.schema.fail(FailureCause::Timeout, generation);
            state.notify_phase(key, EntryPhase::Failed);
        }
    }
}

/// Issue the capability-descriptor fetch unless one is already pending.
pub(crate) fn request_capabilities(shared: &Arc<Shared>, state: &mut State) {
    let key = CacheKey::Capabilities;
    if state.in_flight.contains(&key) {
        return;
    }
    let generation = state.bump_generation(key);
    state.in_flight.insert(key);
    state.capabilities.begin_pending(generation);
    state.stats.fetches_issued += 1;
    state.notify_phase(key, EntryPhase::Pending);

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let call = shared.backend.get_supported_features(shared.table);
        let outcome = timeout(shared.config.fetch_timeout, call).await;
        apply_capabilities(&shared, generation, outcome);
    });
}

fn apply_capabilities(
    shared: &Arc<Shared>,
    generation: u64,
    outcome: Fetched<tabula_model::BackendCapabilities>,
) {
    let mut state = shared.lock_state();
    if state.closed {
        return;
    }
    let key = CacheKey::Capabilities;
    if state.generation(key) != generation {
        state.stats.responses_discarded += 1;
        return;
    }
    state.in_flight.remove(&key);
    match outcome {
        Ok(Ok(capabilities)) => {
            let version = state.data_version;
            state.capabilities.complete(capabilities, version, generation);
            state.stats.responses_applied += 1;
            state.notify_phase(key, EntryPhase::Ready);
            viewport::recompute(shared, &mut state);
        }
        Ok(Err(err)) => {
            state
                .capabilities
                .fail(FailureCause::from_comm(&err), generation);
            state.notify_phase(key, EntryPhase::Failed);
        }
        Err(_) => {
            state.stats.timeouts += 1;
            state.capabilities.fail(FailureCause::Timeout, generation);
            state.notify_phase(key, EntryPhase::Failed);
        }
    }
}

/// Issue a cell-block fetch unless one is already pending for the block.
pub(crate) fn request_block(shared: &Arc<Shared>, state: &mut State, block: BlockKey) {
    let key = CacheKey::Cells(block);
    if state.in_flight.contains(&key) {
        return;
    }
    let generation = state.bump_generation(key);
    state.in_flight.insert(key);

    // Pop and re-push so the block is the most recently used entry.
    let mut entry = state.cells.pop(&block).unwrap_or_default();
    entry.begin_pending(generation);
    if let Some((evicted, _)) = state.cells.push(block, entry) {
        if evicted != block {
            on_block_evicted(state, evicted);
        }
    }
    state.stats.fetches_issued += 1;
    state.notify_phase(key, EntryPhase::Pending);
    tracing::debug!(?block, generation, "fetching cell block");

    let rows = block_rows(&shared.config, block);
    let cols = block_cols(&shared.config, block);
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let call = shared.backend.get_data_values(shared.table, rows, cols);
        let outcome = timeout(shared.config.fetch_timeout, call).await;
        apply_block(&shared, block, generation, outcome);
    });
}

fn apply_block(
    shared: &Arc<Shared>,
    block: BlockKey,
    generation: u64,
    outcome: Fetched<tabula_model::DataChunk>,
) {
    let mut state = shared.lock_state();
    if state.closed {
        return;
    }
    let key = CacheKey::Cells(block);
    if state.generation(key) != generation {
        state.stats.responses_discarded += 1;
        tracing::trace!(?block, generation, "discarding superseded block response");
        return;
    }
    state.in_flight.remove(&key);

    let mut entry = state.cells.pop(&block).unwrap_or_default();
    let phase = match outcome {
        Ok(Ok(chunk)) => {
            let version = state.data_version;
            entry.complete(Arc::new(chunk), version, generation);
            state.stats.responses_applied += 1;
            EntryPhase::Ready
        }
        Ok(Err(err)) => {
            entry.fail(FailureCause::from_comm(&err), generation);
            EntryPhase::Failed
        }
        Err(_) => {
            state.stats.timeouts += 1;
            entry.fail(FailureCause::Timeout, generation);
            EntryPhase::Failed
        }
    };
    if let Some((evicted, _)) = state.cells.push(block, entry) {
        if evicted != block {
            on_block_evicted(&mut state, evicted);
        }
    }
    state.notify_phase(key, phase);
}

fn on_block_evicted(state: &mut State, evicted: BlockKey) {
    state.stats.blocks_evicted += 1;
    let key = CacheKey::Cells(evicted);
    if state.in_flight.remove(&key) {
        // The block's fetch is still running; make its response a no-op.
        state.bump_generation(key);
        state.stats.cancellations += 1;
    }
}

/// Issue one batched profile fetch for the given keys.
///
/// Each (column, kind) keeps its own cache key and generation; the batch is
/// purely a wire-level aggregation. Callers are responsible for busy-gating
/// and for filtering unsupported kinds.
pub(crate) fn request_profiles(
    shared: &Arc<Shared>,
    state: &mut State,
    keys: Vec<(usize, ProfileKind)>,
) {
    if keys.is_empty() {
        return;
    }
    let mut tagged = Vec::with_capacity(keys.len());
    let mut requests = Vec::with_capacity(keys.len());
    for (column, kind) in keys {
        let key = CacheKey::Profile { column, kind };
        if state.in_flight.contains(&key) {
            continue;
        }
        let generation = state.bump_generation(key);
        state.in_flight.insert(key);
        state
            .profiles
            .entry((column, kind))
            .or_default()
            .begin_pending(generation);
        state.stats.fetches_issued += 1;
        state.notify_phase(key, EntryPhase::Pending);
        tagged.push((column, kind, generation));
        requests.push(ProfileRequest {
            column_index: column,
            kind,
        });
    }
    if tagged.is_empty() {
        return;
    }
    tracing::debug!(count = tagged.len(), "fetching column profiles");

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let call = shared.backend.get_column_profiles(shared.table, requests);
        let outcome = timeout(shared.config.fetch_timeout, call).await;
        apply_profiles(&shared, tagged, outcome);
    });
}

fn apply_profiles(
    shared: &Arc<Shared>,
    tagged: Vec<(usize, ProfileKind, u64)>,
    outcome: Fetched<Vec<ProfileReply>>,
) {
    let mut state = shared.lock_state();
    if state.closed {
        return;
    }

    let (replies, batch_failure) = match outcome {
        Ok(Ok(replies)) => (replies, None),
        Ok(Err(err)) => (Vec::new(), Some(FailureCause::from_comm(&err))),
        Err(_) => (Vec::new(), Some(FailureCause::Timeout)),
    };
    let timed_out = matches!(batch_failure, Some(FailureCause::Timeout));

    for (column, kind, generation) in tagged {
        let key = CacheKey::Profile { column, kind };
        if state.generation(key) != generation {
            state.stats.responses_discarded += 1;
            continue;
        }
        state.in_flight.remove(&key);
        if timed_out {
            state.stats.timeouts += 1;
        }

        // The entry can be gone if the column was collapsed after the batch
        // was issued; that cancellation also bumps the generation, so
        // reaching here means an eviction-only prune. Recreate the slot to
        // record the outcome.
        let version = state.data_version;
        let phase = {
            let entry = state.profiles.entry((column, kind)).or_default();
            match &batch_failure {
                None => {
                    let reply = replies
                        .iter()
                        .find(|r| r.column_index == column && r.kind == kind);
                    apply_profile_reply(entry, reply, kind, version, generation)
                }
                Some(cause) => {
                    entry.fail(cause.clone(), generation);
                    EntryPhase::Failed
                }
            }
        };
        if phase == EntryPhase::Ready {
            state.stats.responses_applied += 1;
        }
        state.notify_phase(key, phase);
    }
}

fn apply_profile_reply(
    entry: &mut CacheEntry<tabula_model::ProfileResult>,
    reply: Option<&ProfileReply>,
    kind: ProfileKind,
    version: tabula_model::DataVersion,
    generation: u64,
) -> EntryPhase {
    match reply {
        Some(reply) => match &reply.result {
            Ok(result) if result.kind() == kind => {
                entry.complete(result.clone(), version, generation);
                EntryPhase::Ready
            }
            Ok(_) => {
                entry.fail(
                    FailureCause::Backend("mismatched profile kind in reply".to_string()),
                    generation,
                );
                EntryPhase::Failed
            }
            Err(reason) => {
                entry.fail(FailureCause::Backend(reason.clone()), generation);
                EntryPhase::Failed
            }
        },
        None => {
            entry.fail(
                FailureCause::Backend("backend omitted requested profile".to_string()),
                generation,
            );
            EntryPhase::Failed
        }
    }
}

/// Cancel the in-flight request for `key`, if any.
///
/// Best-effort at the transport (the call future is owned by a detached
/// task, so the cancel takes effect at the application layer: the bumped
/// generation makes the eventual response a no-op) and always effective
/// here: the pending marker rolls back to the best known prior state.
pub(crate) fn cancel(state: &mut State, key: CacheKey) {
    if !state.in_flight.remove(&key) {
        return;
    }
    state.bump_generation(key);
    state.stats.cancellations += 1;
    tracing::debug!(?key, "cancelled in-flight fetch");

    let restored = match key {
        CacheKey::Schema => {
            state.schema.rollback();
            state.schema.value.is_some()
        }
        CacheKey::Capabilities => {
            state.capabilities.rollback();
            state.capabilities.value.is_some()
        }
        CacheKey::Profile { column, kind } => {
            match state.profiles.get_mut(&(column, kind)) {
                Some(entry) => {
                    entry.rollback();
                    entry.value.is_some()
                }
                None => false,
            }
        }
        CacheKey::Cells(block) => match state.cells.peek_mut(&block) {
            Some(entry) => {
                entry.rollback();
                entry.value.is_some()
            }
            None => false,
        },
    };
    if restored {
        state.notify_phase(key, EntryPhase::Ready);
    }
}

/// Cancel every outstanding request (data-version bump, session close).
pub(crate) fn cancel_all(state: &mut State) {
    let keys: Vec<CacheKey> = state.in_flight.iter().copied().collect();
    for key in keys {
        cancel(state, key);
    }
}
