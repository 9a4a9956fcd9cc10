//! Error types for the session layer.

use serde_json::Value;
use thiserror::Error;

use mcplink_proto::jsonrpc::ErrorData;

/// Result type alias using [`SessionError`].
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The duplex channel closed while the operation was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// No response arrived within the configured read timeout.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The peer answered the request with a declared error.
    #[error("remote error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// The server negotiated a protocol version this client does not speak.
    /// Fatal to the whole session; recreate it to retry.
    #[error("unsupported protocol version from the server: {0}")]
    UnsupportedProtocolVersion(String),

    /// `initialize` was called more than once on the same session.
    #[error("session already initialized")]
    AlreadyInitialized,

    /// A protocol operation was attempted before the handshake completed.
    #[error("session not initialized")]
    NotInitialized,

    /// The session serve loop was started a second time.
    #[error("session loop already running")]
    AlreadyRunning,

    /// Payload encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ErrorData> for SessionError {
    fn from(error: ErrorData) -> Self {
        Self::Remote {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}
