//! # tether-client
//!
//! The sync client: one serialized event loop wiring the transport, the
//! session registry, and the resync coordinator together.
//!
//! - [`client`]: [`SyncClient`] (the loop) and [`ClientHandle`] (commands)
//! - [`config`]: [`ClientConfig`], derived from [`tether_settings::TetherSettings`]
//! - [`update`]: [`ClientUpdate`] broadcasts for renderers
//! - [`render`]: Plain-text rendering used by the `tether` binary
//! - [`errors`]: [`ClientError`]

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod errors;
pub mod render;
pub mod update;

pub use client::{ClientHandle, SyncClient};
pub use config::ClientConfig;
pub use errors::ClientError;
pub use update::ClientUpdate;
