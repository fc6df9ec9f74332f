//! # tether-transport
//!
//! Network plumbing for the Tether sync client.
//!
//! - [`supervisor`]: The [`ChannelSupervisor`] owns the single WebSocket
//!   connection: connect with timeout, heartbeat, failure detection, and
//!   reconnection with exponential backoff and jitter
//! - [`heartbeat`]: Pure ping/pong liveness state machine
//! - [`http`]: [`HttpSyncBackend`], the `reqwest` implementation of
//!   [`tether_sync::SyncBackend`]
//! - [`error`]: Transport errors and their mapping onto
//!   [`tether_core::SyncError`]

#![deny(unsafe_code)]

pub mod error;
pub mod heartbeat;
pub mod http;
pub mod supervisor;

pub use error::TransportError;
pub use heartbeat::{Heartbeat, HeartbeatAction};
pub use http::HttpSyncBackend;
pub use supervisor::{
    ChannelSupervisor, CloseReason, SupervisorConfig, SupervisorEvent, SupervisorHandle,
};
