//! # tether-protocol
//!
//! Everything that crosses the wire between the client and the server.
//!
//! - [`inbound`]: Server → client WebSocket frames ([`InboundFrame`], [`InboundEvent`])
//! - [`outbound`]: Client → server WebSocket frames ([`OutboundFrame`], [`OutboundEvent`])
//! - [`api`]: Request/response bodies of the HTTP sync endpoints
//! - [`errors`]: Frame decoding failures
//!
//! Both frame families are closed tagged unions keyed by `type`. Inbound
//! frames with an unrecognized `type` decode to [`InboundEvent::Unknown`]
//! so newer servers never break older clients.

#![deny(unsafe_code)]

pub mod api;
pub mod errors;
pub mod inbound;
pub mod outbound;

pub use api::{
    ApiErrorBody, CreateWorktreeRequest, REPLAY_CURSOR_NOT_FOUND, ReplayBatch, RpcDirection,
    RpcLogEntry, SessionSnapshot, TransientState, WorktreeInfo, WorktreeList,
};
pub use errors::ProtocolError;
pub use inbound::{InboundEvent, InboundFrame, ModelInfo, parse_frame};
pub use outbound::{OutboundEvent, OutboundFrame};
