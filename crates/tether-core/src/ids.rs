//! Identifier newtypes.
//!
//! Server-issued identifiers (sessions, conversation items, turns) are
//! opaque strings. Each gets its own newtype so an item ID can never be
//! passed where a session ID is expected.
//!
//! Only [`ConnectionId`] is generated locally (UUID v7, time-ordered); it
//! tags tracing spans for one connection attempt.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Reserved ID of the main line of work (the non-worktree session).
pub const MAIN_SESSION: &str = "main";

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// The raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                self.as_str()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_owned())
            }
        }
    };
}

branded_id! {
    /// Identifier of a session: `"main"` or a worktree ID.
    SessionId
}

branded_id! {
    /// Server-issued identifier scoping deltas and completions for one
    /// conversation entry.
    ItemId
}

branded_id! {
    /// Identifier of one request/response cycle with the agent.
    TurnId
}

branded_id! {
    /// Locally generated identifier of one connection attempt.
    ConnectionId
}

impl SessionId {
    /// The reserved main session.
    #[must_use]
    pub fn main() -> Self {
        Self(MAIN_SESSION.to_owned())
    }

    /// Whether this is the reserved main session.
    #[must_use]
    pub fn is_main(&self) -> bool {
        self.0 == MAIN_SESSION
    }
}

impl ConnectionId {
    /// Create a new random ID (UUID v7, time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}
