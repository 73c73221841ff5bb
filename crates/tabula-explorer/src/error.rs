use thiserror::Error;

/// API-misuse errors from the explorer façade.
///
/// Fetch failures never show up here: they are surfaced per cache key as
/// `Failed` entry states so the grid always has something well-defined to
/// render. This type exists only for calls that cannot be answered at all.
#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error("table session is closed")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, ExplorerError>;
