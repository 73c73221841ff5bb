use crate::cache::{BlockKey, CacheEntry, CacheKey};
use crate::config::ExplorerConfig;
use crate::notify::{EntryPhase, SubscriptionRegistry};
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};
use tabula_comm::SharedBackend;
use tabula_model::{
    BackendCapabilities, ColumnSchema, DataChunk, DataVersion, ProfileKind, ProfileResult,
    TableHandle, Viewport,
};

/// Cumulative counters for observability (telemetry, debug overlays).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct SyncStats {
    pub fetches_issued: u64,
    pub responses_applied: u64,
    /// Responses dropped by the generation check (superseded, cancelled, or
    /// arriving after a data-version bump).
    pub responses_discarded: u64,
    pub timeouts: u64,
    pub cancellations: u64,
    pub blocks_evicted: u64,
    /// `set_viewport` calls absorbed by coalescing (no flush of their own).
    pub viewport_updates_coalesced: u64,
}

/// Everything one table session's tasks share.
pub(crate) struct Shared {
    pub(crate) table: TableHandle,
    pub(crate) backend: SharedBackend,
    pub(crate) config: ExplorerConfig,
    pub(crate) state: Mutex<State>,
}

impl Shared {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("explorer state mutex poisoned")
    }
}

/// The session's entire mutable state, behind one mutex.
///
/// The mutex is never held across an await; every fetch task locks, checks
/// its generation, applies, and unlocks. Reads from the rendering layer are
/// snapshot reads of settled state under the same lock.
pub(crate) struct State {
    pub(crate) closed: bool,
    pub(crate) data_version: DataVersion,
    pub(crate) schema: CacheEntry<Arc<Vec<ColumnSchema>>>,
    pub(crate) capabilities: CacheEntry<BackendCapabilities>,
    pub(crate) profiles: HashMap<(usize, ProfileKind), CacheEntry<ProfileResult>>,
    pub(crate) cells: LruCache<BlockKey, CacheEntry<Arc<DataChunk>>>,
    /// Authoritative per-key request generations. Missing key means zero.
    pub(crate) generations: HashMap<CacheKey, u64>,
    pub(crate) in_flight: HashSet<CacheKey>,
    /// The applied viewport (what the current fetch set was computed from).
    pub(crate) viewport: Viewport,
    /// The latest requested viewport, not yet flushed.
    pub(crate) target_viewport: Option<Viewport>,
    pub(crate) flush_scheduled: bool,
    pub(crate) busy: bool,
    /// Profile fetches queued while the backend reported busy.
    pub(crate) deferred_profiles: HashSet<(usize, ProfileKind)>,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) stats: SyncStats,
}

impl State {
    pub(crate) fn new(config: &ExplorerConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_cached_blocks.max(1))
            .expect("max_cached_blocks is non-zero");
        Self {
            closed: false,
            data_version: DataVersion::default(),
            schema: CacheEntry::default(),
            capabilities: CacheEntry::default(),
            profiles: HashMap::new(),
            cells: LruCache::new(cap),
            generations: HashMap::new(),
            in_flight: HashSet::new(),
            viewport: Viewport::default(),
            target_viewport: None,
            flush_scheduled: false,
            busy: false,
            deferred_profiles: HashSet::new(),
            registry: SubscriptionRegistry::new(config.cols_per_block),
            stats: SyncStats::default(),
        }
    }

    pub(crate) fn generation(&self, key: CacheKey) -> u64 {
        self.generations.get(&key).copied().unwrap_or(0)
    }

    pub(crate) fn bump_generation(&mut self, key: CacheKey) -> u64 {
        let slot = self.generations.entry(key).or_insert(0);
        *slot = slot.saturating_add(1);
        *slot
    }

    pub(crate) fn notify_phase(&mut self, key: CacheKey, phase: EntryPhase) {
        self.registry.notify(key, phase);
    }
}

// Block/tile math, mirroring the fixed-size paging used for cell data.

pub(crate) fn block_for(config: &ExplorerConfig, row: usize, col: usize) -> BlockKey {
    BlockKey {
        block_row: row / config.rows_per_block,
        block_col: col / config.cols_per_block,
    }
}

pub(crate) fn block_rows(config: &ExplorerConfig, block: BlockKey) -> Range<usize> {
    let start = block.block_row * config.rows_per_block;
    start..start + config.rows_per_block
}

pub(crate) fn block_cols(config: &ExplorerConfig, block: BlockKey) -> Range<usize> {
    let start = block.block_col * config.cols_per_block;
    start..start + config.cols_per_block
}

/// Blocks covering the visible viewport, in row-major order.
pub(crate) fn blocks_for_viewport(config: &ExplorerConfig, viewport: &Viewport) -> Vec<BlockKey> {
    if viewport.row_count == 0 || viewport.column_count == 0 {
        return Vec::new();
    }
    let last_row = viewport.first_row.saturating_add(viewport.row_count - 1);
    let last_col = viewport.first_column.saturating_add(viewport.column_count - 1);
    let first = block_for(config, viewport.first_row, viewport.first_column);
    let last = block_for(config, last_row, last_col);

    let mut blocks = Vec::new();
    for block_row in first.block_row..=last.block_row {
        for block_col in first.block_col..=last.block_col {
            blocks.push(BlockKey {
                block_row,
                block_col,
            });
        }
    }
    blocks
}

/// The viewport expanded by the configured retention margins; cache entries
/// and in-flight fetches inside this rectangle are kept alive.
pub(crate) fn retained_rect(
    config: &ExplorerConfig,
    viewport: &Viewport,
) -> (Range<usize>, Range<usize>) {
    let rows = viewport.first_row.saturating_sub(config.retain_margin_rows)
        ..viewport
            .first_row
            .saturating_add(viewport.row_count)
            .saturating_add(config.retain_margin_rows);
    let cols = viewport
        .first_column
        .saturating_sub(config.retain_margin_columns)
        ..viewport
            .first_column
            .saturating_add(viewport.column_count)
            .saturating_add(config.retain_margin_columns);
    (rows, cols)
}

pub(crate) fn block_intersects(
    config: &ExplorerConfig,
    block: BlockKey,
    rows: &Range<usize>,
    cols: &Range<usize>,
) -> bool {
    let block_rows = block_rows(config, block);
    let block_cols = block_cols(config, block);
    block_rows.start < rows.end
        && rows.start < block_rows.end
        && block_cols.start < cols.end
        && cols.start < block_cols.end
}
