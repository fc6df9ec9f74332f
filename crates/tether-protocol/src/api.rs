//! HTTP sync API bodies.
//!
//! Endpoints (relative to the HTTP base URL):
//!
//! | Method | Path | Body |
//! |---|---|---|
//! | `GET` | `/api/worktrees` | [`WorktreeList`] |
//! | `POST` | `/api/worktrees` | [`CreateWorktreeRequest`] → [`WorktreeInfo`] |
//! | `GET` | `/api/worktrees/{id}/snapshot` | [`SessionSnapshot`] |
//! | `GET` | `/api/worktrees/{id}/messages?since={cursor}` | [`ReplayBatch`] |
//!
//! A replay whose cursor the server no longer knows answers `404` or `410`
//! with an [`ApiErrorBody`] whose code is [`REPLAY_CURSOR_NOT_FOUND`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::{Message, SessionId, SessionStatus, TurnId};

/// Error code returned when a replay cursor is unknown upstream.
pub const REPLAY_CURSOR_NOT_FOUND: &str = "REPLAY_CURSOR_NOT_FOUND";

/// Server-side description of one session (worktree).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeInfo {
    /// Session ID (`main` for the main line of work).
    pub id: SessionId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Git branch backing the worktree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    /// Agent provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Model in use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Reasoning effort in use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    /// Lifecycle status.
    #[serde(default)]
    pub status: SessionStatus,
}

impl WorktreeInfo {
    /// Minimal info for a session known only by ID.
    #[must_use]
    pub fn bare(id: SessionId) -> Self {
        Self {
            name: id.to_string(),
            id,
            branch_name: None,
            provider: None,
            model: None,
            reasoning_effort: None,
            status: SessionStatus::Ready,
        }
    }
}

/// `GET /api/worktrees` response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeList {
    /// Every live session, `main` included.
    #[serde(default)]
    pub worktrees: Vec<WorktreeInfo>,
}

/// `POST /api/worktrees` request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorktreeRequest {
    /// Requested display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Agent provider for the new session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Model for the new session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Authoritative transient state of a session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransientState {
    /// Current lifecycle status.
    #[serde(default)]
    pub status: SessionStatus,
    /// Turn in progress, if any.
    #[serde(default)]
    pub current_turn_id: Option<TurnId>,
    /// Short "what the agent is doing" label.
    #[serde(default)]
    pub activity_label: Option<String>,
}

/// Direction of an agent RPC log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcDirection {
    /// Sent to the agent process.
    Outbound,
    /// Received from the agent process.
    Inbound,
}

/// One agent RPC log line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLogEntry {
    /// When the server observed the line.
    pub timestamp: DateTime<Utc>,
    /// Direction relative to the agent process.
    pub direction: RpcDirection,
    /// Raw RPC payload.
    #[serde(default)]
    pub message: Value,
}

/// `GET /api/worktrees/{id}/snapshot` response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Session the snapshot belongs to.
    pub worktree_id: SessionId,
    /// Complete ordered history.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Transient state at snapshot time.
    #[serde(default)]
    pub state: TransientState,
    /// Latest repository diff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    /// Recent RPC log lines.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<RpcLogEntry>,
}

/// `GET /api/worktrees/{id}/messages` response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayBatch {
    /// Messages after the cursor, in server order.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Transient state at replay time.
    #[serde(default)]
    pub state: TransientState,
}

/// Error body returned by the HTTP API.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Machine-readable code.
    #[serde(default)]
    pub code: Option<String>,
    /// Human-readable message.
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}

impl ApiErrorBody {
    /// Whether the body reports an unknown replay cursor.
    #[must_use]
    pub fn is_replay_gap(&self) -> bool {
        self.code.as_deref() == Some(REPLAY_CURSOR_NOT_FOUND)
    }
}
