//! Error taxonomy for the engine. Sync loops retry `NetworkUnreachable` and
//! `Server` failures; everything else surfaces to the caller.

use thiserror::Error;

/// Persistent-storage failure. Write APIs re-raise this so the host can show
/// an error; the in-memory projection stays unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// DNS/TCP/TLS failure, connection refused, timeout. Recovered by the
    /// retry loops; never surfaced to the user.
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    /// 401/403 from the server. Stops the push loop and raises the global
    /// sync-error flag; the host is expected to re-authenticate.
    #[error("authentication expired")]
    AuthExpired,

    /// Non-auth HTTP failure (5xx and friends). Retried like a network error.
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    /// A payload that cannot be parsed. Skipped when it comes from the
    /// server; rejected synchronously when it comes from the caller.
    #[error("malformed data: {0}")]
    Malformed(String),

    /// Undo requested outside the allowed window; no event is written.
    #[error("cannot undo: last action is too old")]
    UndoExpired,

    /// Write attempted with no current wallet selected.
    #[error("no wallet selected")]
    NoWallet,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// True for failures the sync loops absorb and retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::NetworkUnreachable(_) | EngineError::Server { .. }
        )
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Store(StoreError::Sqlite(e))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Store(StoreError::Codec(e))
    }
}
