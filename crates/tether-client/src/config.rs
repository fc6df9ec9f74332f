//! Client configuration.

use tether_core::SessionId;
use tether_settings::TetherSettings;
use tether_sync::RegistryConfig;
use tether_transport::SupervisorConfig;

/// Everything a [`crate::SyncClient`] needs besides its backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket connection parameters.
    pub supervisor: SupervisorConfig,
    /// Registry tuning.
    pub registry: RegistryConfig,
    /// Session to select once it is known.
    pub default_session: SessionId,
    /// Resync when a session switches agent provider.
    pub resync_on_provider_switch: bool,
    /// Capacity of the update broadcast channel.
    pub update_buffer: usize,
}

impl ClientConfig {
    /// Defaults for a server at `ws_url`.
    #[must_use]
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            supervisor: SupervisorConfig::new(ws_url),
            registry: RegistryConfig::default(),
            default_session: SessionId::main(),
            resync_on_provider_switch: true,
            update_buffer: 1024,
        }
    }

    /// Derive from loaded settings.
    #[must_use]
    pub fn from_settings(settings: &TetherSettings) -> Self {
        let connection = &settings.connection;
        Self {
            supervisor: SupervisorConfig {
                url: settings.server.ws_url.clone(),
                heartbeat_interval: connection.heartbeat_interval(),
                pong_grace: connection.pong_grace(),
                connect_timeout: connection.connect_timeout(),
                outbound_queue: connection.outbound_queue,
                reconnect: connection.reconnect.clone(),
            },
            registry: RegistryConfig {
                dedupe_window: settings.sync.dedupe_window,
                rpc_log_limit: settings.sync.rpc_log_limit,
            },
            default_session: SessionId::from(settings.server.default_session.as_str()),
            resync_on_provider_switch: settings.sync.resync_on_provider_switch,
            update_buffer: 1024,
        }
    }
}
