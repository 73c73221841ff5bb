use crate::cache::{CacheKey, EntryStatus, Snapshot};
use crate::coordinator;
use crate::error::{ExplorerError, Result};
use crate::notify::{ChangeNotice, KeyFilter};
use crate::state::{block_for, Shared, State, SyncStats};
use crate::viewport;
use std::sync::{Arc, MutexGuard};
use tabula_model::{
    BackendCapabilities, CellValue, ColumnSchema, ProfileKind, ProfileResult, TableHandle,
    Viewport,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// Non-blocking read of one grid cell.
#[derive(Clone, Debug)]
pub struct CellState {
    pub value: Option<CellValue>,
    pub status: EntryStatus,
    /// The value predates the current data version; a refresh will follow
    /// once the cell's block is re-read or re-enters the viewport.
    pub stale: bool,
}

/// The façade the rendering layer calls.
///
/// Every read is a snapshot read answering "what should be shown here right
/// now": a value, a pending marker, or a per-key failure. Reads of missing
/// or stale state also trigger the fetch that will eventually repair it, so
/// the renderer never has to know about the coordinator underneath. Cheap to
/// clone; all clones share the session's state.
#[derive(Clone)]
pub struct GridController {
    pub(crate) shared: Arc<Shared>,
}

impl GridController {
    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.shared.lock_state();
        if state.closed {
            return Err(ExplorerError::SessionClosed);
        }
        Ok(state)
    }

    pub fn table(&self) -> TableHandle {
        self.shared.table
    }

    /// Current column schema; triggers a fetch on first read and after a
    /// schema-change invalidation.
    pub fn schema(&self) -> Result<Snapshot<Arc<Vec<ColumnSchema>>>> {
        let mut state = self.lock()?;
        let version = state.data_version;
        if state.schema.needs_fetch(version) {
            coordinator::request_schema(&self.shared, &mut state);
        }
        Ok(state.schema.snapshot(version))
    }

    /// Backend capability descriptor; same read-repair discipline as
    /// [`GridController::schema`].
    pub fn capabilities(&self) -> Result<Snapshot<BackendCapabilities>> {
        let mut state = self.lock()?;
        let version = state.data_version;
        if state.capabilities.needs_fetch(version) {
            coordinator::request_capabilities(&self.shared, &mut state);
        }
        Ok(state.capabilities.snapshot(version))
    }

    /// What should be shown for cell `(row, col)`.
    ///
    /// A miss or stale hit issues the block fetch immediately (cell data is
    /// essential navigation state and is not suppressed while the backend
    /// is busy).
    pub fn cell_state(&self, row: usize, col: usize) -> Result<CellState> {
        let mut state = self.lock()?;
        let version = state.data_version;
        let block = block_for(&self.shared.config, row, col);
        let needs = state
            .cells
            .get(&block)
            .map(|entry| entry.needs_fetch(version))
            .unwrap_or(true);
        if needs {
            coordinator::request_block(&self.shared, &mut state, block);
        }
        let Some(entry) = state.cells.get(&block) else {
            // Only reachable if the freshly inserted pending entry was
            // immediately evicted by a pathologically small cache.
            return Ok(CellState {
                value: None,
                status: EntryStatus::NotRequested,
                stale: false,
            });
        };
        Ok(CellState {
            value: entry
                .value
                .as_ref()
                .and_then(|chunk| chunk.cell(row, col).cloned()),
            status: entry.status.clone(),
            stale: entry.value.is_some() && entry.data_version < version,
        })
    }

    /// Profile state for one column, fetching when the entry is missing,
    /// stale, or failed with no retry pending.
    ///
    /// Kinds the capability descriptor rules out are never requested; the
    /// read reports `NotRequested` forever. While the backend is busy the
    /// fetch is queued instead of issued.
    pub fn column_profile_state(
        &self,
        column: usize,
        kind: ProfileKind,
    ) -> Result<Snapshot<ProfileResult>> {
        let mut state = self.lock()?;
        let version = state.data_version;

        let supported = state
            .capabilities
            .value
            .as_ref()
            .map(|caps| caps.profile_status(kind).is_usable());
        // Unknown capabilities: don't guess; the entry reads as
        // not-requested until the descriptor arrives.
        if supported == Some(true) {
            let key = CacheKey::Profile { column, kind };
            let needs = state
                .profiles
                .get(&(column, kind))
                .map(|entry| entry.needs_fetch(version))
                .unwrap_or(true);
            if needs
                && !state.in_flight.contains(&key)
                && !state.deferred_profiles.contains(&(column, kind))
            {
                if state.busy {
                    viewport::defer_profile(&mut state, column, kind);
                } else {
                    coordinator::request_profiles(&self.shared, &mut state, vec![(column, kind)]);
                }
            }
        }

        Ok(state
            .profiles
            .get(&(column, kind))
            .map(|entry| entry.snapshot(version))
            .unwrap_or(Snapshot {
                value: None,
                status: EntryStatus::NotRequested,
                stale: false,
            }))
    }

    /// Replace the viewport target; the fetch set is recomputed once the
    /// coalescing window closes.
    pub fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        let mut state = self.lock()?;
        viewport::set_target(&self.shared, &mut state, viewport);
        Ok(())
    }

    /// Scroll/resize helper: moves the window while preserving the expanded
    /// column set.
    pub fn scroll_to(
        &self,
        first_row: usize,
        row_count: usize,
        first_column: usize,
        column_count: usize,
    ) -> Result<()> {
        let mut state = self.lock()?;
        let mut target = state
            .target_viewport
            .clone()
            .unwrap_or_else(|| state.viewport.clone());
        target.first_row = first_row;
        target.row_count = row_count;
        target.first_column = first_column;
        target.column_count = column_count;
        viewport::set_target(&self.shared, &mut state, target);
        Ok(())
    }

    /// Toggle a column's profile panel. Returns the new expanded state.
    pub fn toggle_expand_column(&self, column: usize) -> Result<bool> {
        let mut state = self.lock()?;
        let mut target = state
            .target_viewport
            .clone()
            .unwrap_or_else(|| state.viewport.clone());
        let expanded = if target.expanded_columns.remove(&column) {
            false
        } else {
            target.expanded_columns.insert(column);
            true
        };
        viewport::set_target(&self.shared, &mut state, target);
        Ok(expanded)
    }

    pub fn is_expanded(&self, column: usize) -> Result<bool> {
        let state = self.lock()?;
        let viewport = state.target_viewport.as_ref().unwrap_or(&state.viewport);
        Ok(viewport.is_expanded(column))
    }

    /// Register for narrow change notifications; see [`KeyFilter`].
    pub fn subscribe(&self, filter: KeyFilter) -> Result<UnboundedReceiver<ChangeNotice>> {
        let mut state = self.lock()?;
        Ok(state.registry.subscribe(filter))
    }

    /// Cumulative counters; available even after the session closes.
    pub fn stats_snapshot(&self) -> SyncStats {
        self.shared.lock_state().stats
    }
}
