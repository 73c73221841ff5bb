use crate::config::ExplorerConfig;
use crate::controller::GridController;
use crate::coordinator;
use crate::invalidation;
use crate::state::{Shared, State};
use std::sync::{Arc, Mutex};
use tabula_comm::SharedBackend;
use tabula_model::TableHandle;
use tokio::task::JoinHandle;
use tracing::debug;

/// One open table: owns the shared state, the event pump, and the fetch
/// tasks spawned on its behalf.
///
/// Dropping (or closing) the session marks the state closed, so in-flight
/// fetch tasks that wake up afterwards discard their responses and exit.
pub struct TableSession {
    shared: Arc<Shared>,
    pump: Option<JoinHandle<()>>,
}

impl TableSession {
    /// Open a session and immediately start fetching the schema and the
    /// capability descriptor; cell and profile fetches wait for reads and
    /// viewport updates.
    pub fn open(backend: SharedBackend, table: TableHandle, config: ExplorerConfig) -> Self {
        let config = config.sanitized();
        let events = backend.take_events();
        let shared = Arc::new(Shared {
            table,
            backend,
            config: config.clone(),
            state: Mutex::new(State::new(&config)),
        });

        {
            let mut state = shared.lock_state();
            coordinator::request_schema(&shared, &mut state);
            coordinator::request_capabilities(&shared, &mut state);
        }

        let pump = events.map(|events| {
            let shared = Arc::clone(&shared);
            tokio::spawn(invalidation::run_event_pump(shared, events))
        });
        debug!(table = %table, "table session opened");

        Self { shared, pump }
    }

    pub fn controller(&self) -> GridController {
        GridController {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Tear the session down: no further reads succeed, and every in-flight
    /// response is discarded when its task next checks the state.
    pub fn close(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        let mut state = self.shared.lock_state();
        if state.closed {
            return;
        }
        state.closed = true;
        coordinator::cancel_all(&mut state);
        state.profiles.clear();
        state.cells.clear();
        state.deferred_profiles.clear();
        state.target_viewport = None;
        debug!(table = %self.shared.table, "table session closed");
    }
}

impl Drop for TableSession {
    fn drop(&mut self) {
        self.close();
    }
}
