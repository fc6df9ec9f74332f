//! # tether-sync
//!
//! Client-side state for the Tether sync engine.
//!
//! - [`store`]: Per-session ordered, de-duplicated conversation ([`MessageStore`])
//! - [`reconcile`]: The reducer applying [`StoreEvent`]s to a store
//! - [`display`]: Presentation grouping of activity entries
//! - [`session`]: One session's conversation plus turn bookkeeping
//! - [`registry`]: Routes inbound frames to the right session ([`SessionRegistry`])
//! - [`resync`]: Repairs state after reconnects ([`ResyncCoordinator`])
//!
//! Everything except the resync fetches is synchronous and runs inside the
//! client's single event loop; there is no internal locking on session state.

#![deny(unsafe_code)]

pub mod display;
pub mod reconcile;
pub mod registry;
pub mod resync;
pub mod session;
pub mod store;

pub use display::{DisplayItem, group_for_display};
pub use reconcile::{StoreEvent, apply, reduce};
pub use registry::{Effect, ListDiff, RegistryConfig, RouteOutcome, SessionRegistry};
pub use resync::{
    ResyncCoordinator, ResyncOutcome, ResyncPayload, ResyncReason, ResyncStep, SyncBackend,
};
pub use session::{Session, SessionView, TurnEnd};
pub use store::{MessageStore, StoreChange};
