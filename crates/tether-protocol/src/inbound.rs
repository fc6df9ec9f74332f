//! Server → client frames.
//!
//! Every frame is a JSON object with a `type` discriminator. Two envelope
//! fields may accompany any type:
//!
//! - `worktreeId`: the session the frame is scoped to (absent means `main`)
//! - `seq`: a per-session delivery sequence number used for de-duplication
//!
//! [`parse_frame`] splits the envelope from the payload and decodes the
//! payload into the closed [`InboundEvent`] union.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::{Attachment, ItemId, SessionId, SessionStatus, TurnId};

use crate::api::{RpcLogEntry, WorktreeInfo};
use crate::errors::ProtocolError;

/// One entry of the server's model catalogue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Model identifier sent back in `model_set`.
    pub id: String,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Provider serving the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Supported reasoning effort levels.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning_efforts: Vec<String>,
}

/// Payload of a server → client frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    /// Activity label update, optionally carrying a lifecycle status.
    #[serde(rename = "status")]
    Status {
        /// Short "what the agent is doing" label.
        #[serde(default)]
        message: Option<String>,
        /// Lifecycle status of the session.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<SessionStatus>,
    },

    /// The agent process is up.
    #[serde(rename = "ready")]
    Ready {
        /// Provider now serving the session.
        #[serde(default)]
        provider: Option<String>,
        /// Model in use.
        #[serde(default)]
        model: Option<String>,
    },

    /// Streaming fragment of an assistant entry.
    #[serde(rename = "assistant_delta")]
    AssistantDelta {
        /// Entry being streamed.
        #[serde(rename = "itemId")]
        item_id: ItemId,
        /// Text fragment to append.
        delta: String,
        /// Producing turn.
        #[serde(rename = "turnId", default, skip_serializing_if = "Option::is_none")]
        turn_id: Option<TurnId>,
    },

    /// Final text of an assistant entry.
    #[serde(rename = "assistant_message")]
    AssistantMessage {
        /// Entry being completed.
        #[serde(rename = "itemId")]
        item_id: ItemId,
        /// Authoritative full text.
        text: String,
        /// Producing turn.
        #[serde(rename = "turnId", default, skip_serializing_if = "Option::is_none")]
        turn_id: Option<TurnId>,
    },

    /// Echo of a recorded user entry.
    #[serde(rename = "user_message")]
    UserMessage {
        /// Entry ID.
        #[serde(rename = "itemId")]
        item_id: ItemId,
        /// Text as recorded.
        text: String,
        /// Attachment references.
        #[serde(default)]
        attachments: Vec<Attachment>,
    },

    /// Streaming output of a command execution.
    #[serde(rename = "command_execution_delta")]
    CommandExecutionDelta {
        /// Command entry.
        #[serde(rename = "itemId")]
        item_id: ItemId,
        /// Output fragment.
        delta: String,
    },

    /// A command execution finished.
    #[serde(rename = "command_execution_completed")]
    CommandExecutionCompleted {
        /// Command entry.
        #[serde(rename = "itemId")]
        item_id: ItemId,
        /// Complete output; replaces accumulated deltas when present.
        #[serde(rename = "aggregatedOutput", default)]
        aggregated_output: Option<String>,
        /// Process exit code.
        #[serde(rename = "exitCode", default)]
        exit_code: Option<i32>,
        /// Command line.
        #[serde(default)]
        command: Option<String>,
    },

    /// A turn began.
    #[serde(rename = "turn_started")]
    TurnStarted {
        /// New turn.
        #[serde(rename = "turnId")]
        turn_id: TurnId,
    },

    /// A turn ended normally.
    #[serde(rename = "turn_completed")]
    TurnCompleted {
        /// Ended turn (absent means the current one).
        #[serde(rename = "turnId", default)]
        turn_id: Option<TurnId>,
    },

    /// A turn failed.
    #[serde(rename = "turn_error")]
    TurnError {
        /// Failed turn (absent means the current one).
        #[serde(rename = "turnId", default)]
        turn_id: Option<TurnId>,
        /// Server-provided reason.
        #[serde(default)]
        message: String,
    },

    /// Session-scoped error outside a turn.
    #[serde(rename = "error")]
    Error {
        /// Error text.
        #[serde(default)]
        message: String,
    },

    /// Latest repository diff of the session's worktree.
    #[serde(rename = "repo_diff")]
    RepoDiff {
        /// Unified diff text.
        #[serde(default)]
        diff: String,
    },

    /// Model catalogue.
    #[serde(rename = "model_list")]
    ModelList {
        /// Available models.
        #[serde(default)]
        models: Vec<ModelInfo>,
    },

    /// The session's model changed.
    #[serde(rename = "model_set")]
    ModelSet {
        /// New model.
        model: String,
        /// New reasoning effort.
        #[serde(rename = "reasoningEffort", default)]
        reasoning_effort: Option<String>,
        /// Provider serving the model.
        #[serde(default)]
        provider: Option<String>,
    },

    /// One agent RPC log line.
    #[serde(rename = "rpc_log")]
    RpcLog {
        /// The log line.
        entry: RpcLogEntry,
    },

    /// The agent started working on an item.
    #[serde(rename = "item_started")]
    ItemStarted {
        /// Item ID.
        #[serde(rename = "itemId")]
        item_id: ItemId,
        /// Item kind as reported by the agent (e.g. `commandExecution`).
        #[serde(rename = "itemType", default)]
        item_type: String,
        /// Command line, for command executions.
        #[serde(default)]
        command: Option<String>,
    },

    /// A session was created.
    #[serde(rename = "worktree_created")]
    WorktreeCreated {
        /// New session metadata.
        worktree: WorktreeInfo,
    },

    /// A session's metadata changed.
    #[serde(rename = "worktree_updated")]
    WorktreeUpdated {
        /// Updated metadata.
        worktree: WorktreeInfo,
    },

    /// A session was closed (merged or discarded).
    #[serde(rename = "worktree_removed")]
    WorktreeRemoved {
        /// Closed session.
        #[serde(rename = "worktreeId")]
        worktree_id: SessionId,
    },

    /// Heartbeat acknowledgment.
    #[serde(rename = "pong")]
    Pong,

    /// Any type this client does not know.
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    /// Wire name of the frame type, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Ready { .. } => "ready",
            Self::AssistantDelta { .. } => "assistant_delta",
            Self::AssistantMessage { .. } => "assistant_message",
            Self::UserMessage { .. } => "user_message",
            Self::CommandExecutionDelta { .. } => "command_execution_delta",
            Self::CommandExecutionCompleted { .. } => "command_execution_completed",
            Self::TurnStarted { .. } => "turn_started",
            Self::TurnCompleted { .. } => "turn_completed",
            Self::TurnError { .. } => "turn_error",
            Self::Error { .. } => "error",
            Self::RepoDiff { .. } => "repo_diff",
            Self::ModelList { .. } => "model_list",
            Self::ModelSet { .. } => "model_set",
            Self::RpcLog { .. } => "rpc_log",
            Self::ItemStarted { .. } => "item_started",
            Self::WorktreeCreated { .. } => "worktree_created",
            Self::WorktreeUpdated { .. } => "worktree_updated",
            Self::WorktreeRemoved { .. } => "worktree_removed",
            Self::Pong => "pong",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the event concerns the session set rather than one
    /// session's conversation.
    #[must_use]
    pub fn is_registry_scoped(&self) -> bool {
        matches!(
            self,
            Self::WorktreeCreated { .. }
                | Self::WorktreeUpdated { .. }
                | Self::WorktreeRemoved { .. }
                | Self::ModelList { .. }
        )
    }
}

/// A decoded server → client frame.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundFrame {
    /// Session the frame is scoped to.
    pub session_id: SessionId,
    /// Delivery sequence number, when the server assigns one.
    pub seq: Option<u64>,
    /// The payload.
    pub event: InboundEvent,
}

/// Decode one text frame.
///
/// # Errors
///
/// Returns [`ProtocolError`] when the text is not a JSON object with a
/// string `type`, when an envelope field is ill-typed, or when a known
/// type carries an invalid payload. Unknown types are not errors.
pub fn parse_frame(text: &str) -> Result<InboundFrame, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
    let Value::Object(map) = &value else {
        return Err(ProtocolError::NotAnObject);
    };

    let frame_type = map
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_owned();

    let session_id = match map.get("worktreeId") {
        None | Some(Value::Null) => SessionId::main(),
        Some(Value::String(id)) if id.is_empty() => SessionId::main(),
        Some(Value::String(id)) => SessionId::from(id.as_str()),
        Some(_) => return Err(ProtocolError::InvalidEnvelope { field: "worktreeId" }),
    };

    let seq = match map.get("seq") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            raw.as_u64()
                .ok_or(ProtocolError::InvalidEnvelope { field: "seq" })?,
        ),
    };

    let event = serde_json::from_value(value)
        .map_err(|source| ProtocolError::InvalidPayload { frame_type, source })?;

    Ok(InboundFrame {
        session_id,
        seq,
        event,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn missing_worktree_id_means_main() {
        let frame =
            parse_frame(r#"{"type":"assistant_delta","itemId":"m1","delta":"Hi"}"#).unwrap();
        assert!(frame.session_id.is_main());
        assert_eq!(frame.seq, None);
        assert_eq!(
            frame.event,
            InboundEvent::AssistantDelta {
                item_id: ItemId::from("m1"),
                delta: "Hi".into(),
                turn_id: None,
            }
        );
    }

    #[test]
    fn envelope_fields_are_extracted() {
        let frame = parse_frame(
            r#"{"type":"turn_started","turnId":"t1","worktreeId":"wt-2","seq":42}"#,
        )
        .unwrap();
        assert_eq!(frame.session_id.as_str(), "wt-2");
        assert_eq!(frame.seq, Some(42));
        assert_matches!(frame.event, InboundEvent::TurnStarted { ref turn_id } if turn_id.as_str() == "t1");
    }

    #[test]
    fn unknown_type_decodes_to_unknown() {
        let frame = parse_frame(r#"{"type":"something_new","payload":{"a":1}}"#).unwrap();
        assert_eq!(frame.event, InboundEvent::Unknown);
        assert_eq!(frame.event.kind(), "unknown");
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert_matches!(parse_frame("{not json"), Err(ProtocolError::Malformed(_)));
    }

    #[test]
    fn non_object_is_rejected() {
        assert_matches!(parse_frame("[1,2]"), Err(ProtocolError::NotAnObject));
    }

    #[test]
    fn missing_type_is_rejected() {
        assert_matches!(
            parse_frame(r#"{"itemId":"m1"}"#),
            Err(ProtocolError::MissingType)
        );
    }

    #[test]
    fn invalid_payload_names_the_type() {
        let err = parse_frame(r#"{"type":"assistant_delta","delta":"x"}"#).unwrap_err();
        assert_matches!(err, ProtocolError::InvalidPayload { ref frame_type, .. } if frame_type == "assistant_delta");
    }

    #[test]
    fn ill_typed_seq_is_rejected() {
        assert_matches!(
            parse_frame(r#"{"type":"pong","seq":"one"}"#),
            Err(ProtocolError::InvalidEnvelope { field: "seq" })
        );
    }

    #[test]
    fn command_completed_without_aggregate() {
        let frame = parse_frame(
            r#"{"type":"command_execution_completed","itemId":"c1","exitCode":1}"#,
        )
        .unwrap();
        assert_matches!(
            frame.event,
            InboundEvent::CommandExecutionCompleted {
                aggregated_output: None,
                exit_code: Some(1),
                ..
            }
        );
    }

    #[test]
    fn turn_completed_without_turn_id() {
        let frame = parse_frame(r#"{"type":"turn_completed"}"#).unwrap();
        assert_eq!(frame.event, InboundEvent::TurnCompleted { turn_id: None });
    }

    #[test]
    fn user_message_with_attachments() {
        let frame = parse_frame(
            r#"{"type":"user_message","itemId":"u1","text":"look","attachments":[{"id":"a1","mimeType":"image/png"}]}"#,
        )
        .unwrap();
        let InboundEvent::UserMessage { attachments, .. } = frame.event else {
            panic!("expected user_message");
        };
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].mime_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn worktree_created_is_registry_scoped() {
        let frame = parse_frame(
            r#"{"type":"worktree_created","worktree":{"id":"wt-9","name":"fix","status":"creating"}}"#,
        )
        .unwrap();
        assert!(frame.event.is_registry_scoped());
        assert_matches!(frame.event, InboundEvent::WorktreeCreated { ref worktree } if worktree.status == SessionStatus::Creating);
    }

    #[test]
    fn worktree_removed_scopes_to_removed_session() {
        let frame = parse_frame(r#"{"type":"worktree_removed","worktreeId":"wt-4"}"#).unwrap();
        assert_eq!(frame.session_id.as_str(), "wt-4");
        assert_matches!(frame.event, InboundEvent::WorktreeRemoved { ref worktree_id } if worktree_id.as_str() == "wt-4");
    }

    #[test]
    fn status_with_lifecycle() {
        let frame =
            parse_frame(r#"{"type":"status","message":"Merging","status":"merging"}"#).unwrap();
        assert_eq!(
            frame.event,
            InboundEvent::Status {
                message: Some("Merging".into()),
                status: Some(SessionStatus::Merging),
            }
        );
    }

    #[test]
    fn pong_decodes() {
        assert_eq!(parse_frame(r#"{"type":"pong"}"#).unwrap().event, InboundEvent::Pong);
    }

    #[test]
    fn model_list_decodes() {
        let frame = parse_frame(
            r#"{"type":"model_list","models":[{"id":"gpt-5","displayName":"GPT-5","reasoningEfforts":["low","high"]}]}"#,
        )
        .unwrap();
        let InboundEvent::ModelList { models } = frame.event else {
            panic!("expected model_list");
        };
        assert_eq!(models[0].reasoning_efforts, vec!["low", "high"]);
    }
}
