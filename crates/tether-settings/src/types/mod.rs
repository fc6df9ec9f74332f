//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production values. Sections are `#[serde(default)]` so
//! partial JSON is accepted.

mod connection;
mod server;

pub use connection::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// # JSON Format
///
/// ```json
/// {
///   "server": { "wsUrl": "wss://example.dev/ws" },
///   "connection": { "reconnect": { "maxAttempts": 10 } }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Server endpoints.
    pub server: ServerSettings,
    /// Connection lifecycle tuning.
    pub connection: ConnectionSettings,
    /// Reconciliation and resync tuning.
    pub sync: SyncSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl TetherSettings {
    /// Reject values the client cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] for the first bad field.
    pub fn validate(&self) -> Result<()> {
        let conn = &self.connection;
        let checks = [
            (conn.heartbeat_interval_ms == 0, "connection.heartbeatIntervalMs", "must be positive"),
            (conn.pong_grace_ms == 0, "connection.pongGraceMs", "must be positive"),
            (conn.outbound_queue == 0, "connection.outboundQueue", "must be positive"),
            (
                conn.reconnect.max_delay_ms < conn.reconnect.base_delay_ms,
                "connection.reconnect.maxDelayMs",
                "is below baseDelayMs",
            ),
            (self.sync.dedupe_window == 0, "sync.dedupeWindow", "must be positive"),
        ];
        match checks.into_iter().find(|(bad, _, _)| *bad) {
            Some((_, field, reason)) => Err(SettingsError::Invalid { field, reason }),
            None => Ok(()),
        }
    }
}

/// Reconciliation and resync settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Sequence numbers remembered per session for duplicate detection.
    pub dedupe_window: usize,
    /// RPC log lines kept per session.
    pub rpc_log_limit: usize,
    /// Resync when a session's provider changes.
    pub resync_on_provider_switch: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            dedupe_window: 1024,
            rpc_log_limit: 500,
            resync_on_provider_switch: true,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}
