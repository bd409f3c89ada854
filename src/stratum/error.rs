//! Error taxonomy for the pool session.

use thiserror::Error;

/// Errors surfaced by the transport, codec, and session.
///
/// Only `Protocol` is recoverable, and then only until three consecutive
/// occurrences; everything else terminates the session. The caller owns any
/// reconnect/backoff policy.
#[derive(Error, Debug)]
pub enum StratumError {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure on an outgoing frame
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Initial connection failed; no retry is attempted internally
    #[error("connect failed: {0}")]
    Connect(String),

    /// Malformed or unexpected frame; recoverable unless consecutive
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Subscribe response did not carry the fields the handshake requires
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Pool rejected the credentials; credentials are not self-correcting
    #[error("authorization failed: {0}")]
    Auth(String),

    /// Peer closed the connection; propagated to all pending requests
    #[error("connection closed")]
    ConnectionClosed,
}

impl StratumError {
    /// Whether the session can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StratumError::Protocol(_))
    }
}

/// Convenient result alias for session operations.
pub type StratumResult<T> = Result<T, StratumError>;
