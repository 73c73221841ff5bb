use thiserror::Error;

/// Failures crossing the comm boundary.
///
/// Every variant is scoped to the single call that produced it; nothing here
/// is fatal to a session.
#[derive(Debug, Error)]
pub enum CommError {
    /// The channel to the backend is gone (process exit, stream EOF).
    #[error("comm channel closed")]
    ChannelClosed,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The backend rejected the request (unsupported operation, invalid
    /// range, …) with its own reason.
    #[error("backend error: {0}")]
    Backend(String),
    /// The call was abandoned before the backend answered.
    #[error("request cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, CommError>;
