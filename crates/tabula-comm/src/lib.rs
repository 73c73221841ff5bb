//! `tabula-comm` is the RPC boundary between the data explorer and its
//! computational backend.
//!
//! It exposes:
//! - the [`Backend`] trait: the asynchronous request/response + event surface
//!   the synchronization layer consumes
//! - [`JsonRpcTransport`]: a line-framed JSON-RPC client over any
//!   `AsyncRead`/`AsyncWrite` duplex pair, with response correlation and
//!   best-effort cancellation (dropping a call future sends a
//!   `cancel_request` notification)
//! - [`ScriptedBackend`]: an in-process backend whose calls park until a test
//!   resolves them, used by `tabula-explorer`'s integration tests
//!
//! Serialization is owned entirely by this crate; callers only see typed
//! results from `tabula-model`.

mod backend;
mod error;
mod jsonrpc;
pub mod scripted;

pub use backend::{Backend, BackendEventStream, ProfileReply, ProfileRequest, SharedBackend};
pub use error::{CommError, Result};
pub use jsonrpc::JsonRpcTransport;
pub use scripted::{PendingCall, ScriptedBackend, ScriptedCall, ScriptedHandle};
