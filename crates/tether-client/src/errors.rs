//! Client errors.

use tether_core::{SessionId, SyncError};

/// Why a client command failed.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The connection is not open; nothing was sent.
    #[error("not connected")]
    NotConnected,

    /// The session has no turn to interrupt.
    #[error("no active turn in session {0}")]
    NoActiveTurn(SessionId),

    /// The `main` session cannot be closed.
    #[error("the main session cannot be closed")]
    MainSession,

    /// Sync engine error (unknown session, backend failure).
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The client loop has stopped.
    #[error("client stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(ClientError::NotConnected.to_string(), "not connected");
        assert_eq!(
            ClientError::NoActiveTurn(SessionId::from("wt-1")).to_string(),
            "no active turn in session wt-1"
        );
        let stale = ClientError::from(SyncError::StaleSessionReference {
            session_id: SessionId::from("gone"),
        });
        assert_eq!(stale.to_string(), "stale session reference: gone");
    }
}
