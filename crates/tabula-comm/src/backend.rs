use crate::error::Result;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use tabula_model::{
    BackendCapabilities, BackendEvent, ColumnSchema, DataChunk, FieldEntry, ObjectEntry,
    ObjectPath, ProfileKind, ProfileResult, TableHandle,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// One item of a batched `get_column_profiles` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProfileRequest {
    pub column_index: usize,
    pub kind: ProfileKind,
}

/// Per-item outcome of a batched profile call.
///
/// A failed item carries the backend's reason and does not fail the batch;
/// the synchronization layer surfaces it on that item's cache key only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProfileReply {
    pub column_index: usize,
    pub kind: ProfileKind,
    pub result: std::result::Result<ProfileResult, String>,
}

/// Stream of notifications pushed by the backend.
pub type BackendEventStream = UnboundedReceiver<(TableHandle, BackendEvent)>;

/// Backend trait object shared across the explorer's tasks.
pub type SharedBackend = Arc<dyn Backend>;

/// The asynchronous RPC surface consumed from the computational backend.
///
/// All methods return boxed futures so the trait stays object-safe; the
/// explorer holds backends as `Arc<dyn Backend>`.
///
/// Cancellation contract: dropping a returned future before completion is
/// the cancellation signal. Implementations forward it to the backend on a
/// best-effort basis (see [`JsonRpcTransport`](crate::JsonRpcTransport));
/// callers never rely on the backend honoring it.
pub trait Backend: Send + Sync {
    /// Full column list for the table. Always a wholesale snapshot.
    fn get_schema(&self, table: TableHandle) -> BoxFuture<'_, Result<Vec<ColumnSchema>>>;

    /// Capability descriptor; fetched once per table.
    fn get_supported_features(
        &self,
        table: TableHandle,
    ) -> BoxFuture<'_, Result<BackendCapabilities>>;

    /// Batched per-column profiles. Item failures are reported per item.
    fn get_column_profiles(
        &self,
        table: TableHandle,
        requests: Vec<ProfileRequest>,
    ) -> BoxFuture<'_, Result<Vec<ProfileReply>>>;

    /// Formatted cell values for a rectangular row/column range
    /// (half-open on both axes).
    fn get_data_values(
        &self,
        table: TableHandle,
        rows: Range<usize>,
        columns: Range<usize>,
    ) -> BoxFuture<'_, Result<DataChunk>>;

    // Connections-pane surface. Consumed by the connections client, which
    // applies the same coordination discipline as the grid.

    fn list_objects(&self, path: ObjectPath) -> BoxFuture<'_, Result<Vec<ObjectEntry>>>;

    fn list_fields(&self, path: ObjectPath) -> BoxFuture<'_, Result<Vec<FieldEntry>>>;

    fn contains_data(&self, path: ObjectPath) -> BoxFuture<'_, Result<bool>>;

    /// Icon identifier for the object, if the backend provides one.
    fn get_icon(&self, path: ObjectPath) -> BoxFuture<'_, Result<Option<String>>>;

    /// Small preview of a data object's contents.
    fn preview_object(&self, path: ObjectPath) -> BoxFuture<'_, Result<DataChunk>>;

    /// Take the backend's event stream.
    ///
    /// The stream is handed out once (to the session's event pump); later
    /// calls return `None`.
    fn take_events(&self) -> Option<BackendEventStream>;
}
