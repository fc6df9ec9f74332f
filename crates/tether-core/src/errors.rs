//! Error taxonomy for the sync engine.
//!
//! [`SyncError`] classifies every failure the engine can observe. Each
//! variant maps to an [`ErrorKind`] and a [`Disposition`] describing how the
//! engine recovers:
//!
//! | Kind | Disposition |
//! |---|---|
//! | `TransportFailure` | reconnect; surfaced only when retries exhaust |
//! | `ProtocolViolation` | absorb (frame dropped, connection kept) |
//! | `TurnFailure` | surface inline for the affected session |
//! | `ReplayGap` | fall back to full-history replay |
//! | `StaleSessionReference` | absorb (event dropped) |
//! | `Backend` | absorb (logged, resync for the session skipped) |

use std::fmt;

use thiserror::Error;

use crate::ids::{ItemId, SessionId, TurnId};

/// Machine-readable error classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection dropped or unreachable.
    TransportFailure,
    /// Unparseable or ill-typed frame.
    ProtocolViolation,
    /// The server reported a failed turn.
    TurnFailure,
    /// Replay cursor unknown upstream.
    ReplayGap,
    /// Event for a session that no longer exists locally.
    StaleSessionReference,
    /// Request/response failure against the sync backend.
    Backend,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportFailure => write!(f, "transport_failure"),
            Self::ProtocolViolation => write!(f, "protocol_violation"),
            Self::TurnFailure => write!(f, "turn_failure"),
            Self::ReplayGap => write!(f, "replay_gap"),
            Self::StaleSessionReference => write!(f, "stale_session_reference"),
            Self::Backend => write!(f, "backend"),
        }
    }
}

/// How the engine recovers from an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Schedule a reconnect with backoff.
    Reconnect,
    /// Show to the user, scoped to the affected session.
    Surface,
    /// Retry the replay without a cursor.
    FullReplay,
    /// Drop silently (debug log only).
    Absorb,
}

/// Top-level error type for the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport dropped or unreachable.
    #[error("transport failure: {message}")]
    TransportFailure {
        /// Human-readable description.
        message: String,
        /// Underlying I/O or WebSocket error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A frame could not be decoded.
    #[error("protocol violation: {reason}")]
    ProtocolViolation {
        /// What was wrong with the frame.
        reason: String,
    },

    /// A turn failed on the server.
    #[error("turn failed in session {session_id}: {message}")]
    TurnFailure {
        /// Affected session.
        session_id: SessionId,
        /// Failed turn, when reported.
        turn_id: Option<TurnId>,
        /// Server-provided message.
        message: String,
    },

    /// The replay cursor was not found upstream.
    #[error("replay cursor {cursor} not found for session {session_id}")]
    ReplayGap {
        /// Session being replayed.
        session_id: SessionId,
        /// The unknown cursor.
        cursor: ItemId,
    },

    /// The event targeted a session that is unknown or closed.
    #[error("stale session reference: {session_id}")]
    StaleSessionReference {
        /// The referenced session.
        session_id: SessionId,
    },

    /// The sync backend failed.
    #[error("sync backend error: {message}")]
    Backend {
        /// HTTP status, when the server answered.
        status: Option<u16>,
        /// Human-readable description.
        message: String,
    },
}

impl SyncError {
    /// Transport failure from any error source.
    pub fn transport(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::TransportFailure {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Protocol violation with a reason.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }

    /// Backend failure with an optional HTTP status.
    pub fn backend(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Backend {
            status,
            message: message.into(),
        }
    }

    /// Error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransportFailure { .. } => ErrorKind::TransportFailure,
            Self::ProtocolViolation { .. } => ErrorKind::ProtocolViolation,
            Self::TurnFailure { .. } => ErrorKind::TurnFailure,
            Self::ReplayGap { .. } => ErrorKind::ReplayGap,
            Self::StaleSessionReference { .. } => ErrorKind::StaleSessionReference,
            Self::Backend { .. } => ErrorKind::Backend,
        }
    }

    /// Recovery strategy.
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        match self.kind() {
            ErrorKind::TransportFailure => Disposition::Reconnect,
            ErrorKind::TurnFailure => Disposition::Surface,
            ErrorKind::ReplayGap => Disposition::FullReplay,
            ErrorKind::ProtocolViolation
            | ErrorKind::StaleSessionReference
            | ErrorKind::Backend => Disposition::Absorb,
        }
    }

    /// Whether the error is shown to the user as it happens.
    #[must_use]
    pub fn is_user_visible(&self) -> bool {
        self.disposition() == Disposition::Surface
    }
}

/// Convenience type alias for sync results.
pub type Result<T> = std::result::Result<T, SyncError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn transport_failure_reconnects() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = SyncError::transport("socket closed", io);
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert_eq!(err.disposition(), Disposition::Reconnect);
        assert!(!err.is_user_visible());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn protocol_violation_is_absorbed() {
        let err = SyncError::protocol("missing type");
        assert_eq!(err.disposition(), Disposition::Absorb);
        assert_eq!(err.to_string(), "protocol violation: missing type");
    }

    #[test]
    fn turn_failure_is_surfaced() {
        let err = SyncError::TurnFailure {
            session_id: SessionId::from("wt-1"),
            turn_id: Some(TurnId::from("t1")),
            message: "model overloaded".into(),
        };
        assert!(err.is_user_visible());
        assert_eq!(
            err.to_string(),
            "turn failed in session wt-1: model overloaded"
        );
    }

    #[test]
    fn replay_gap_falls_back() {
        let err = SyncError::ReplayGap {
            session_id: SessionId::main(),
            cursor: ItemId::from("m9"),
        };
        assert_eq!(err.disposition(), Disposition::FullReplay);
        assert!(err.to_string().contains("m9"));
    }

    #[test]
    fn stale_session_is_absorbed() {
        let err = SyncError::StaleSessionReference {
            session_id: SessionId::from("gone"),
        };
        assert_eq!(err.kind(), ErrorKind::StaleSessionReference);
        assert_eq!(err.disposition(), Disposition::Absorb);
    }

    #[test]
    fn backend_keeps_status() {
        let err = SyncError::backend(Some(503), "unavailable");
        assert_matches!(err, SyncError::Backend { status: Some(503), .. });
    }

    #[test]
    fn kind_display() {
        assert_eq!(ErrorKind::ReplayGap.to_string(), "replay_gap");
        assert_eq!(
            ErrorKind::StaleSessionReference.to_string(),
            "stale_session_reference"
        );
    }
}
