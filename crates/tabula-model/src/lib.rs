//! `tabula-model` defines the data model shared by the data explorer stack.
//!
//! The crate is intentionally self-contained so it can be reused by:
//! - the RPC/comm boundary (`tabula-comm`)
//! - the synchronization layer (`tabula-explorer`)
//! - any host embedding the explorer via `serde` (JSON-safe schema)
//!
//! Everything here is pure data: no I/O, no async, no caching policy.

mod connections;
mod event;
mod profile;
mod schema;
mod table;
mod value;
mod viewport;

pub use connections::{FieldEntry, ObjectEntry, ObjectPath};
pub use event::BackendEvent;
pub use profile::{
    BackendCapabilities, FrequencyTable, Histogram, ProfileCapability, ProfileKind, ProfileResult,
    SummaryStats, SupportStatus,
};
pub use schema::{ColumnDisplayType, ColumnSchema};
pub use table::TableHandle;
pub use value::{CellValue, ColumnChunk, DataChunk};
pub use viewport::{DataVersion, Viewport};
