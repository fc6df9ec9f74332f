//! Server endpoint settings.

use serde::{Deserialize, Serialize};

/// Where the client connects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// WebSocket endpoint for live frames.
    pub ws_url: String,
    /// Base URL of the HTTP sync API.
    pub http_url: String,
    /// Session selected at startup.
    pub default_session: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8787/ws".to_string(),
            http_url: "http://127.0.0.1:8787".to_string(),
            default_session: tether_core::MAIN_SESSION.to_string(),
        }
    }
}
