//! Session and connection lifecycles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a session (worktree).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    /// The server is provisioning the worktree.
    Creating,
    /// Idle and accepting input.
    #[default]
    Ready,
    /// A turn is in progress.
    Processing,
    /// The worktree is being merged back.
    Merging,
    /// The merge stopped on conflicts.
    MergeConflict,
    /// The last turn failed; the session stays usable.
    Error,
    /// The worktree finished its work.
    Completed,
}

impl SessionStatus {
    /// Whether the status is driven by turn events rather than the
    /// worktree lifecycle.
    #[must_use]
    pub fn is_turn_driven(self) -> bool {
        matches!(self, Self::Processing)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Ready => write!(f, "ready"),
            Self::Processing => write!(f, "processing"),
            Self::Merging => write!(f, "merging"),
            Self::MergeConflict => write!(f, "mergeConflict"),
            Self::Error => write!(f, "error"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Lifecycle of the single transport connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// A connection attempt (or backoff wait) is in progress.
    Connecting,
    /// Connected and heartbeat-alive.
    Open,
    /// A deliberate close is in progress.
    Closing,
    /// No connection and no attempt scheduled.
    #[default]
    Closed,
}

impl ConnectionState {
    /// Whether outbound sends can succeed.
    #[must_use]
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "connected"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_status_wire_names() {
        assert_eq!(
            serde_json::to_value(SessionStatus::MergeConflict).unwrap(),
            "mergeConflict"
        );
        let parsed: SessionStatus = serde_json::from_str("\"processing\"").unwrap();
        assert_eq!(parsed, SessionStatus::Processing);
    }

    #[test]
    fn session_status_default_is_ready() {
        assert_eq!(SessionStatus::default(), SessionStatus::Ready);
    }

    #[test]
    fn only_processing_is_turn_driven() {
        assert!(SessionStatus::Processing.is_turn_driven());
        assert!(!SessionStatus::Merging.is_turn_driven());
        assert!(!SessionStatus::Error.is_turn_driven());
    }

    #[test]
    fn display_matches_wire() {
        assert_eq!(SessionStatus::MergeConflict.to_string(), "mergeConflict");
        assert_eq!(SessionStatus::Ready.to_string(), "ready");
    }

    #[test]
    fn connection_state_indicator_text() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Open.to_string(), "connected");
        assert_eq!(ConnectionState::Closed.to_string(), "disconnected");
    }

    #[test]
    fn connection_state_default_closed() {
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
        assert!(!ConnectionState::default().is_open());
        assert!(ConnectionState::Open.is_open());
    }
}
