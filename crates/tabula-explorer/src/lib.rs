//! `tabula-explorer` is the client-side synchronization layer between an
//! interactive grid and a computational backend reachable only over an
//! asynchronous RPC channel.
//!
//! The grid may display tables with millions of rows and columns; this layer
//! materializes only the visible viewport. It:
//! - caches the column schema, per-column profiles, and block-tiled cell
//!   values for the open table
//! - deduplicates overlapping fetches (at most one in-flight request per
//!   cache key) and discards superseded responses via generation counters
//! - coalesces rapid viewport changes so scroll gestures do not issue a
//!   request per intermediate position
//! - consumes backend change notifications and invalidates selectively,
//!   version-scoped and lazy rather than by sweeping
//! - notifies renderers per affected cache key, never wholesale
//!
//! Everything is owned by a [`TableSession`], created when a table opens and
//! dropped when it closes. The rendering layer talks to the
//! [`GridController`] façade, whose reads are non-blocking snapshot reads.

mod cache;
mod config;
mod connections;
mod controller;
mod coordinator;
mod error;
mod invalidation;
mod notify;
mod session;
mod state;
mod viewport;

pub use cache::{BlockKey, CacheEntry, CacheKey, EntryStatus, FailureCause, Snapshot};
pub use config::ExplorerConfig;
pub use connections::{ConnectionsClient, ConnectionsOp, ConnectionsValue};
pub use controller::{CellState, GridController};
pub use error::{ExplorerError, Result};
pub use notify::{ChangeNotice, EntryPhase, KeyFilter};
pub use session::TableSession;
pub use state::SyncStats;
pub use viewport::profile_kinds_for;
