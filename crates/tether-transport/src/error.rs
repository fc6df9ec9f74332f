//! Transport error types.

use tether_core::SyncError;

/// Errors raised by the WebSocket and HTTP layers.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// WebSocket handshake or stream failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not the expected JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The connect attempt did not complete in time.
    #[error("connect timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// A configured URL cannot be used.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The URL.
        url: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Machine-readable error code from the body, if any.
        code: Option<String>,
        /// Error description.
        message: String,
    },
}

impl TransportError {
    /// HTTP status, when the server answered.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(error) => error.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<TransportError> for SyncError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::WebSocket(_) | TransportError::ConnectTimeout { .. } => {
                SyncError::transport(error.to_string(), error)
            }
            TransportError::Status {
                status, message, ..
            } => SyncError::backend(Some(status), message),
            other => SyncError::backend(other.status(), other.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
