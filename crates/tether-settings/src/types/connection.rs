//! Connection lifecycle settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::ReconnectPolicy;

/// Heartbeat, timeout, queue and reconnect tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Interval between heartbeat pings in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// How long to wait for a pong before declaring the connection dead.
    pub pong_grace_ms: u64,
    /// Upper bound on a single connect attempt in milliseconds.
    pub connect_timeout_ms: u64,
    /// Capacity of the outbound frame queue.
    pub outbound_queue: usize,
    /// Reconnect backoff.
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 25_000,
            pong_grace_ms: 8_000,
            connect_timeout_ms: 10_000,
            outbound_queue: 256,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ConnectionSettings {
    /// Heartbeat interval as a [`Duration`].
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Pong grace window as a [`Duration`].
    #[must_use]
    pub fn pong_grace(&self) -> Duration {
        Duration::from_millis(self.pong_grace_ms)
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
