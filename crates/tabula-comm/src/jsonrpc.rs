use crate::backend::{Backend, BackendEventStream, ProfileReply, ProfileRequest};
use crate::error::{CommError, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tabula_model::{
    BackendCapabilities, BackendEvent, ColumnSchema, DataChunk, FieldEntry, ObjectEntry,
    ObjectPath, TableHandle,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: JsonValue,
}

#[derive(Deserialize)]
struct Incoming {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<JsonValue>,
    #[serde(default)]
    error: Option<WireError>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<JsonValue>,
}

#[derive(Deserialize)]
struct WireError {
    message: String,
}

#[derive(Deserialize)]
struct EventParams {
    table: TableHandle,
    event: BackendEvent,
}

struct Inner {
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<JsonValue>>>>,
    outgoing: mpsc::UnboundedSender<String>,
    next_id: AtomicU64,
    events: Mutex<Option<BackendEventStream>>,
}

/// Line-framed JSON-RPC client over an `AsyncRead`/`AsyncWrite` duplex pair.
///
/// One frame per line. Responses are correlated to requests by id; frames
/// with a `method` field are treated as backend notifications and forwarded
/// to the event stream. Dropping an unresolved call future removes its
/// pending slot and sends a `cancel_request` notification, so a late reply
/// for that id is ignored even if the backend never honors the cancel.
#[derive(Clone)]
pub struct JsonRpcTransport {
    inner: Arc<Inner>,
}

impl JsonRpcTransport {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<String>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            pending: Mutex::new(HashMap::new()),
            outgoing: outgoing_tx,
            next_id: AtomicU64::new(1),
            events: Mutex::new(Some(events_rx)),
        });

        tokio::spawn(write_loop(writer, outgoing_rx));
        tokio::spawn(read_loop(reader, Arc::clone(&inner), events_tx));

        Self { inner }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: JsonValue) -> Result<T> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .expect("transport mutex poisoned")
            .insert(id, tx);

        let frame = serde_json::to_string(&Request {
            jsonrpc: "2.0",
            id,
            method,
            params,
        })?;
        tracing::trace!(id, method, "rpc request");
        if self.inner.outgoing.send(frame).is_err() {
            self.inner
                .pending
                .lock()
                .expect("transport mutex poisoned")
                .remove(&id);
            return Err(CommError::ChannelClosed);
        }

        let mut guard = CancelOnDrop {
            id,
            inner: Arc::clone(&self.inner),
            armed: true,
        };
        let outcome = rx.await;
        guard.armed = false;
        let value = outcome.map_err(|_| CommError::ChannelClosed)??;
        Ok(serde_json::from_value(value)?)
    }
}

/// Unanswered-call guard: dropping the call future cancels the request.
struct CancelOnDrop {
    id: u64,
    inner: Arc<Inner>,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let removed = self
            .inner
            .pending
            .lock()
            .expect("transport mutex poisoned")
            .remove(&self.id)
            .is_some();
        if removed {
            tracing::debug!(id = self.id, "cancelling in-flight rpc");
            let frame = json!({
                "jsonrpc": "2.0",
                "method": "cancel_request",
                "params": { "id": self.id },
            });
            let _ = self.inner.outgoing.send(frame.to_string());
        }
    }
}

async fn write_loop<W>(mut writer: W, mut outgoing: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(frame) = outgoing.recv().await {
        if writer.write_all(frame.as_bytes()).await.is_err() {
            break;
        }
        if writer.write_all(b"\n").await.is_err() {
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
    }
}

async fn read_loop<R>(
    reader: R,
    inner: Arc<Inner>,
    events_tx: mpsc::UnboundedSender<(TableHandle, BackendEvent)>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        let incoming: Incoming = match serde_json::from_str(&line) {
            Ok(incoming) => incoming,
            Err(err) => {
                tracing::warn!(%err, "dropping malformed rpc frame");
                continue;
            }
        };

        if let Some(method) = incoming.method.as_deref() {
            if method == "event" {
                if let Some(params) = incoming.params {
                    match serde_json::from_value::<EventParams>(params) {
                        Ok(event) => {
                            let _ = events_tx.send((event.table, event.event));
                        }
                        Err(err) => tracing::warn!(%err, "dropping malformed event"),
                    }
                }
            }
            continue;
        }

        let Some(id) = incoming.id else {
            continue;
        };
        let slot = inner
            .pending
            .lock()
            .expect("transport mutex poisoned")
            .remove(&id);
        let Some(slot) = slot else {
            // Response to a cancelled or unknown request.
            tracing::trace!(id, "dropping reply to cancelled request");
            continue;
        };
        let outcome = match (incoming.result, incoming.error) {
            (_, Some(err)) => Err(CommError::Backend(err.message)),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(JsonValue::Null),
        };
        let _ = slot.send(outcome);
    }

    // Channel gone: fail whatever is still outstanding.
    let stranded = std::mem::take(
        &mut *inner.pending.lock().expect("transport mutex poisoned"),
    );
    for (_, slot) in stranded {
        let _ = slot.send(Err(CommError::ChannelClosed));
    }
}

impl Backend for JsonRpcTransport {
    fn get_schema(&self, table: TableHandle) -> BoxFuture<'_, Result<Vec<ColumnSchema>>> {
        async move { self.call("get_schema", json!({ "table": table })).await }.boxed()
    }

    fn get_supported_features(
        &self,
        table: TableHandle,
    ) -> BoxFuture<'_, Result<BackendCapabilities>> {
        async move {
            self.call("get_supported_features", json!({ "table": table }))
                .await
        }
        .boxed()
    }

    fn get_column_profiles(
        &self,
        table: TableHandle,
        requests: Vec<ProfileRequest>,
    ) -> BoxFuture<'_, Result<Vec<ProfileReply>>> {
        async move {
            self.call(
                "get_column_profiles",
                json!({ "table": table, "profiles": requests }),
            )
            .await
        }
        .boxed()
    }

    fn get_data_values(
        &self,
        table: TableHandle,
        rows: Range<usize>,
        columns: Range<usize>,
    ) -> BoxFuture<'_, Result<DataChunk>> {
        async move {
            self.call(
                "get_data_values",
                json!({
                    "table": table,
                    "row_start": rows.start,
                    "num_rows": rows.len(),
                    "column_start": columns.start,
                    "num_columns": columns.len(),
                }),
            )
            .await
        }
        .boxed()
    }

    fn list_objects(&self, path: ObjectPath) -> BoxFuture<'_, Result<Vec<ObjectEntry>>> {
        async move { self.call("list_objects", json!({ "path": path })).await }.boxed()
    }

    fn list_fields(&self, path: ObjectPath) -> BoxFuture<'_, Result<Vec<FieldEntry>>> {
        async move { self.call("list_fields", json!({ "path": path })).await }.boxed()
    }

    fn contains_data(&self, path: ObjectPath) -> BoxFuture<'_, Result<bool>> {
        async move { self.call("contains_data", json!({ "path": path })).await }.boxed()
    }

    fn get_icon(&self, path: ObjectPath) -> BoxFuture<'_, Result<Option<String>>> {
        async move { self.call("get_icon", json!({ "path": path })).await }.boxed()
    }

    fn preview_object(&self, path: ObjectPath) -> BoxFuture<'_, Result<DataChunk>> {
        async move { self.call("preview_object", json!({ "path": path })).await }.boxed()
    }

    fn take_events(&self) -> Option<BackendEventStream> {
        self.inner
            .events
            .lock()
            .expect("transport mutex poisoned")
            .take()
    }
}
