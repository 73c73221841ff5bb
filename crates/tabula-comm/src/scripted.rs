//! In-process backend whose calls park until the test resolves them.
//!
//! Every RPC issued through [`ScriptedBackend`] shows up on the paired
//! [`ScriptedHandle`] as a [`PendingCall`]. The test inspects the call,
//! then answers, rejects, or simply never resolves it. Dropping the caller's
//! future closes the responder, which the test can observe via
//! [`PendingCall::caller_gone`]; cancellation assertions build on that.

use crate::backend::{Backend, BackendEventStream, ProfileReply, ProfileRequest};
use crate::error::{CommError, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::ops::Range;
use std::sync::{Arc, Mutex};
use tabula_model::{
    BackendCapabilities, BackendEvent, ColumnSchema, DataChunk, FieldEntry, ObjectEntry,
    ObjectPath, TableHandle,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

/// Which RPC a [`PendingCall`] represents, with its arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptedCall {
    GetSchema {
        table: TableHandle,
    },
    GetSupportedFeatures {
        table: TableHandle,
    },
    GetColumnProfiles {
        table: TableHandle,
        requests: Vec<ProfileRequest>,
    },
    GetDataValues {
        table: TableHandle,
        rows: Range<usize>,
        columns: Range<usize>,
    },
    ListObjects {
        path: ObjectPath,
    },
    ListFields {
        path: ObjectPath,
    },
    ContainsData {
        path: ObjectPath,
    },
    GetIcon {
        path: ObjectPath,
    },
    PreviewObject {
        path: ObjectPath,
    },
}

impl ScriptedCall {
    /// Short method name, mirroring the wire method.
    pub fn method(&self) -> &'static str {
        match self {
            ScriptedCall::GetSchema { .. } => "get_schema",
            ScriptedCall::GetSupportedFeatures { .. } => "get_supported_features",
            ScriptedCall::GetColumnProfiles { .. } => "get_column_profiles",
            ScriptedCall::GetDataValues { .. } => "get_data_values",
            ScriptedCall::ListObjects { .. } => "list_objects",
            ScriptedCall::ListFields { .. } => "list_fields",
            ScriptedCall::ContainsData { .. } => "contains_data",
            ScriptedCall::GetIcon { .. } => "get_icon",
            ScriptedCall::PreviewObject { .. } => "preview_object",
        }
    }
}

/// One parked RPC awaiting a scripted resolution.
pub struct PendingCall {
    pub call: ScriptedCall,
    responder: oneshot::Sender<Result<JsonValue>>,
}

impl PendingCall {
    /// Answer the call with a typed result.
    pub fn respond<T: Serialize>(self, value: &T) {
        let value = serde_json::to_value(value).expect("scripted response serializes");
        let _ = self.responder.send(Ok(value));
    }

    /// Reject the call with a backend-supplied reason.
    pub fn respond_err(self, message: impl Into<String>) {
        let _ = self.responder.send(Err(CommError::Backend(message.into())));
    }

    /// Fail the call as if the channel died.
    pub fn respond_channel_closed(self) {
        let _ = self.responder.send(Err(CommError::ChannelClosed));
    }

    /// True when the caller abandoned the request (its future was dropped).
    pub fn caller_gone(&self) -> bool {
        self.responder.is_closed()
    }
}

struct Shared {
    calls_tx: UnboundedSender<PendingCall>,
    history: Mutex<Vec<ScriptedCall>>,
    events: Mutex<Option<BackendEventStream>>,
}

/// Backend double for tests; see the module docs.
pub struct ScriptedBackend {
    shared: Arc<Shared>,
}

/// Test-side handle paired with a [`ScriptedBackend`].
pub struct ScriptedHandle {
    calls_rx: UnboundedReceiver<PendingCall>,
    shared: Arc<Shared>,
    events_tx: UnboundedSender<(TableHandle, BackendEvent)>,
}

impl ScriptedBackend {
    pub fn new() -> (Arc<Self>, ScriptedHandle) {
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            calls_tx,
            history: Mutex::new(Vec::new()),
            events: Mutex::new(Some(events_rx)),
        });
        let backend = Arc::new(Self {
            shared: Arc::clone(&shared),
        });
        let handle = ScriptedHandle {
            calls_rx,
            shared,
            events_tx,
        };
        (backend, handle)
    }

    fn issue(&self, call: ScriptedCall) -> BoxFuture<'static, Result<JsonValue>> {
        self.shared
            .history
            .lock()
            .expect("scripted backend mutex poisoned")
            .push(call.clone());
        let (responder, rx) = oneshot::channel();
        let parked = self
            .shared
            .calls_tx
            .send(PendingCall { call, responder })
            .is_ok();
        async move {
            if !parked {
                return Err(CommError::ChannelClosed);
            }
            rx.await.map_err(|_| CommError::ChannelClosed)?
        }
        .boxed()
    }

    fn typed<T: serde::de::DeserializeOwned>(
        &self,
        call: ScriptedCall,
    ) -> BoxFuture<'static, Result<T>> {
        let raw = self.issue(call);
        async move {
            let value = raw.await?;
            Ok(serde_json::from_value(value)?)
        }
        .boxed()
    }
}

impl ScriptedHandle {
    /// Wait for the next parked call.
    pub async fn next_call(&mut self) -> PendingCall {
        self.calls_rx
            .recv()
            .await
            .expect("scripted backend still alive")
    }

    /// Next parked call if one is already queued.
    pub fn try_next_call(&mut self) -> Option<PendingCall> {
        self.calls_rx.try_recv().ok()
    }

    /// Every call issued so far, in order, including resolved ones.
    pub fn history(&self) -> Vec<ScriptedCall> {
        self.shared
            .history
            .lock()
            .expect("scripted backend mutex poisoned")
            .clone()
    }

    /// Number of calls issued so far for the given wire method.
    pub fn calls_for(&self, method: &str) -> usize {
        self.history()
            .iter()
            .filter(|call| call.method() == method)
            .count()
    }

    /// Push a backend notification into the event stream.
    pub fn emit(&self, table: TableHandle, event: BackendEvent) {
        let _ = self.events_tx.send((table, event));
    }
}

impl Backend for ScriptedBackend {
    fn get_schema(&self, table: TableHandle) -> BoxFuture<'_, Result<Vec<ColumnSchema>>> {
        self.typed(ScriptedCall::GetSchema { table })
    }

    fn get_supported_features(
        &self,
        table: TableHandle,
    ) -> BoxFuture<'_, Result<BackendCapabilities>> {
        self.typed(ScriptedCall::GetSupportedFeatures { table })
    }

    fn get_column_profiles(
        &self,
        table: TableHandle,
        requests: Vec<ProfileRequest>,
    ) -> BoxFuture<'_, Result<Vec<ProfileReply>>> {
        self.typed(ScriptedCall::GetColumnProfiles { table, requests })
    }

    fn get_data_values(
        &self,
        table: TableHandle,
        rows: Range<usize>,
        columns: Range<usize>,
    ) -> BoxFuture<'_, Result<DataChunk>> {
        self.typed(ScriptedCall::GetDataValues {
            table,
            rows,
            columns,
        })
    }

    fn list_objects(&self, path: ObjectPath) -> BoxFuture<'_, Result<Vec<ObjectEntry>>> {
        self.typed(ScriptedCall::ListObjects { path })
    }

    fn list_fields(&self, path: ObjectPath) -> BoxFuture<'_, Result<Vec<FieldEntry>>> {
        self.typed(ScriptedCall::ListFields { path })
    }

    fn contains_data(&self, path: ObjectPath) -> BoxFuture<'_, Result<bool>> {
        self.typed(ScriptedCall::ContainsData { path })
    }

    fn get_icon(&self, path: ObjectPath) -> BoxFuture<'_, Result<Option<String>>> {
        self.typed(ScriptedCall::GetIcon { path })
    }

    fn preview_object(&self, path: ObjectPath) -> BoxFuture<'_, Result<DataChunk>> {
        self.typed(ScriptedCall::PreviewObject { path })
    }

    fn take_events(&self) -> Option<BackendEventStream> {
        self.shared
            .events
            .lock()
            .expect("scripted backend mutex poisoned")
            .take()
    }
}
