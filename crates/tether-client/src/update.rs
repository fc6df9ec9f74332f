//! Notifications for renderers.

use std::sync::Arc;

use tether_core::{ConnectionState, SessionId};
use tether_protocol::ModelInfo;
use tether_sync::SessionView;

/// What changed. Session payloads are read-only snapshots.
#[derive(Clone, Debug)]
pub enum ClientUpdate {
    /// Connection state changed.
    Connection(ConnectionState),
    /// A session changed; the view reflects its new state.
    Session(Arc<SessionView>),
    /// A session appeared.
    SessionCreated(SessionId),
    /// A session was closed.
    SessionClosed(SessionId),
    /// The rendered session changed.
    ActiveChanged(SessionId),
    /// The model catalogue changed.
    Models(Vec<ModelInfo>),
    /// A turn failed.
    TurnFailed {
        /// Session.
        session_id: SessionId,
        /// Server message.
        message: String,
    },
    /// A session-scoped error arrived.
    SessionError {
        /// Session.
        session_id: SessionId,
        /// Server message.
        message: String,
    },
    /// A resync run started.
    ResyncStarted {
        /// Run epoch.
        epoch: u64,
    },
    /// A resync run finished.
    ResyncFinished {
        /// Run epoch.
        epoch: u64,
    },
    /// Reconnection gave up; the connection stays closed until the next
    /// deliberate connect.
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
    },
}
