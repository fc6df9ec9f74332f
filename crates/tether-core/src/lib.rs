//! # tether-core
//!
//! Foundation types, errors, branded IDs, and utilities for the Tether sync client.
//!
//! This crate provides the shared vocabulary that all other Tether crates depend on:
//!
//! - **Branded IDs**: `SessionId`, `ItemId`, `TurnId`, `ConnectionId` as newtypes for type safety
//! - **Messages**: `Message` with `Role`, `CommandStatus`, and attachment references
//! - **Status**: `SessionStatus` and `ConnectionState` lifecycles
//! - **Backoff**: `ReconnectPolicy` and the exponential backoff formula
//! - **Errors**: `SyncError` taxonomy via `thiserror`, with recovery dispositions
//! - **Logging**: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod retry;
pub mod status;

pub use errors::{Disposition, ErrorKind, SyncError};
pub use ids::{ConnectionId, ItemId, MAIN_SESSION, SessionId, TurnId};
pub use messages::{Attachment, CommandStatus, Message, Role};
pub use retry::ReconnectPolicy;
pub use status::{ConnectionState, SessionStatus};
