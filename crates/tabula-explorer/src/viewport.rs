//! Tracks the visible window and decides what must be fetched.
//!
//! `set_viewport` only records the latest target; the fetch set is computed
//! once per coalescing window, so a scroll gesture's intermediate positions
//! never issue requests of their own. The flush computes the symmetric
//! difference against the applied viewport: newly visible blocks and newly
//! expanded columns produce fetches, while in-flight work that left the
//! retained margin is cancelled and its entries become evictable.

use crate::cache::{BlockKey, CacheKey};
use crate::coordinator;
use crate::notify::EntryPhase;
use crate::state::{block_intersects, blocks_for_viewport, retained_rect, Shared, State};
use std::collections::HashSet;
use std::sync::Arc;
use tabula_model::{ColumnDisplayType, ProfileKind, Viewport};

/// Profile kinds worth computing for a column of the given display type.
///
/// The match is exhaustive on purpose: a new display type must state its
/// profile set here before the crate compiles.
pub fn profile_kinds_for(display_type: ColumnDisplayType) -> &'static [ProfileKind] {
    match display_type {
        ColumnDisplayType::Number => &[
            ProfileKind::NullCount,
            ProfileKind::SummaryStats,
            ProfileKind::Histogram,
        ],
        ColumnDisplayType::Boolean => &[ProfileKind::NullCount, ProfileKind::FrequencyTable],
        ColumnDisplayType::String => &[ProfileKind::NullCount, ProfileKind::FrequencyTable],
        ColumnDisplayType::Date | ColumnDisplayType::Datetime | ColumnDisplayType::Time => &[
            ProfileKind::NullCount,
            ProfileKind::SummaryStats,
            ProfileKind::Histogram,
        ],
        ColumnDisplayType::Interval
        | ColumnDisplayType::Object
        | ColumnDisplayType::Array
        | ColumnDisplayType::Struct
        | ColumnDisplayType::Unknown => &[ProfileKind::NullCount],
    }
}

/// Record the new viewport target and schedule a coalesced flush.
pub(crate) fn set_target(shared: &Arc<Shared>, state: &mut State, viewport: Viewport) {
    if state.target_viewport.replace(viewport).is_some() {
        state.stats.viewport_updates_coalesced += 1;
    }
    schedule_flush(shared, state);
}

pub(crate) fn schedule_flush(shared: &Arc<Shared>, state: &mut State) {
    if state.flush_scheduled {
        return;
    }
    state.flush_scheduled = true;
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::time::sleep(shared.config.coalesce_delay).await;
        flush(&shared);
    });
}

fn flush(shared: &Arc<Shared>) {
    let mut state = shared.lock_state();
    state.flush_scheduled = false;
    if state.closed {
        return;
    }
    let Some(target) = state.target_viewport.take() else {
        return;
    };
    state.viewport = target;
    recompute(shared, &mut state);
}

/// Reconcile caches and in-flight work with the applied viewport.
///
/// Also invoked after schema/capability arrival and after a busy release,
/// since both can unlock fetches the previous pass had to skip.
pub(crate) fn recompute(shared: &Arc<Shared>, state: &mut State) {
    let config = &shared.config;
    let viewport = state.viewport.clone();
    let (retained_rows, retained_cols) = retained_rect(config, &viewport);
    let version = state.data_version;

    // Newly visible cell blocks. Touching existing entries also refreshes
    // their LRU position so eviction lands on far-away blocks first.
    for block in blocks_for_viewport(config, &viewport) {
        let needs = state
            .cells
            .get(&block)
            .map(|entry| entry.needs_fetch(version))
            .unwrap_or(true);
        if needs {
            coordinator::request_block(shared, state, block);
        }
    }

    // In-flight blocks that scrolled beyond the retained margin.
    let stale_blocks: Vec<BlockKey> = state
        .in_flight
        .iter()
        .filter_map(|key| match key {
            CacheKey::Cells(block)
                if !block_intersects(config, *block, &retained_rows, &retained_cols) =>
            {
                Some(*block)
            }
            _ => None,
        })
        .collect();
    for block in stale_blocks {
        coordinator::cancel(state, CacheKey::Cells(block));
    }

    // Profile planning needs both the schema (display types) and the
    // capability descriptor; until both are in, expanded columns simply
    // wait. Arrival of either re-runs this pass.
    let wanted: HashSet<(usize, ProfileKind)> = match (
        state.schema.value.clone(),
        state.capabilities.value.clone(),
    ) {
        (Some(schema), Some(capabilities)) => {
            let mut wanted = HashSet::new();
            for &column in &viewport.expanded_columns {
                if !retained_cols.contains(&column) {
                    continue;
                }
                let Some(col_schema) = schema.iter().find(|c| c.column_index == column) else {
                    continue;
                };
                for &kind in profile_kinds_for(col_schema.display_type) {
                    if capabilities.profile_status(kind).is_usable() {
                        wanted.insert((column, kind));
                    }
                }
            }
            wanted
        }
        _ => HashSet::new(),
    };
    let planning_ready =
        state.schema.value.is_some() && state.capabilities.value.is_some();

    // Cancel in-flight profiles that are no longer wanted (column collapsed
    // or scrolled beyond the margin).
    if planning_ready {
        let unwanted: Vec<(usize, ProfileKind)> = state
            .in_flight
            .iter()
            .filter_map(|key| match key {
                CacheKey::Profile { column, kind } if !wanted.contains(&(*column, *kind)) => {
                    Some((*column, *kind))
                }
                _ => None,
            })
            .collect();
        for (column, kind) in unwanted {
            coordinator::cancel(state, CacheKey::Profile { column, kind });
        }

        // Deferred fetches whose column left the viewport are dropped, and
        // their queued pending markers rolled back.
        let expired: Vec<(usize, ProfileKind)> = state
            .deferred_profiles
            .iter()
            .filter(|key| !wanted.contains(key))
            .copied()
            .collect();
        for (column, kind) in expired {
            state.deferred_profiles.remove(&(column, kind));
            if let Some(entry) = state.profiles.get_mut(&(column, kind)) {
                entry.rollback();
            }
        }

        // Proactively drop entries for columns that exited the expanded set
        // or the retained margin, bounding memory to what is visible.
        state.profiles.retain(|&(column, _), _| {
            viewport.expanded_columns.contains(&column) && retained_cols.contains(&column)
        });
    }

    // Fetch (or defer, while the backend is busy) what is newly wanted.
    let mut to_fetch = Vec::new();
    for &(column, kind) in &wanted {
        let key = CacheKey::Profile { column, kind };
        if state.in_flight.contains(&key) || state.deferred_profiles.contains(&(column, kind)) {
            continue;
        }
        let needs = state
            .profiles
            .get(&(column, kind))
            .map(|entry| entry.needs_fetch(version))
            .unwrap_or(true);
        if needs {
            to_fetch.push((column, kind));
        }
    }
    if state.busy {
        for (column, kind) in to_fetch {
            defer_profile(state, column, kind);
        }
    } else {
        to_fetch.sort_unstable();
        coordinator::request_profiles(shared, state, to_fetch);
    }
}

/// Queue a profile fetch until the backend reports idle. The entry is shown
/// as pending so readers do not re-trigger it.
pub(crate) fn defer_profile(state: &mut State, column: usize, kind: ProfileKind) {
    if !state.deferred_profiles.insert((column, kind)) {
        return;
    }
    let key = CacheKey::Profile { column, kind };
    let generation = state.generation(key);
    state
        .profiles
        .entry((column, kind))
        .or_default()
        .begin_pending(generation);
    state.notify_phase(key, EntryPhase::Pending);
    tracing::debug!(column, ?kind, "deferring profile fetch while backend busy");
}

/// Release fetches deferred during a busy interval.
pub(crate) fn release_deferred(shared: &Arc<Shared>, state: &mut State) {
    if state.deferred_profiles.is_empty() {
        return;
    }
    let deferred: Vec<(usize, ProfileKind)> = state.deferred_profiles.drain().collect();
    for &(column, kind) in &deferred {
        if let Some(entry) = state.profiles.get_mut(&(column, kind)) {
            // Undo the queued pending marker so the replan below sees the
            // entry's true (missing/stale/failed) state.
            entry.rollback();
        }
    }
    tracing::debug!(count = deferred.len(), "releasing deferred profile fetches");
    recompute(shared, state);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_display_type_profiles_null_count() {
        // Cheapest profile; every column type gets it.
        for display_type in [
            ColumnDisplayType::Number,
            ColumnDisplayType::Boolean,
            ColumnDisplayType::String,
            ColumnDisplayType::Date,
            ColumnDisplayType::Datetime,
            ColumnDisplayType::Time,
            ColumnDisplayType::Interval,
            ColumnDisplayType::Object,
            ColumnDisplayType::Array,
            ColumnDisplayType::Struct,
            ColumnDisplayType::Unknown,
        ] {
            assert!(
                profile_kinds_for(display_type).contains(&ProfileKind::NullCount),
                "{display_type} should include a null count",
            );
        }
    }

    #[test]
    fn container_types_get_no_numeric_profiles() {
        for display_type in [
            ColumnDisplayType::Object,
            ColumnDisplayType::Array,
            ColumnDisplayType::Struct,
        ] {
            let kinds = profile_kinds_for(display_type);
            assert!(!kinds.contains(&ProfileKind::SummaryStats));
            assert!(!kinds.contains(&ProfileKind::Histogram));
        }
    }
}
