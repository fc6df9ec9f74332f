//! Client → server frames.

use serde::{Deserialize, Serialize};
use tether_core::{Attachment, SessionId, TurnId};

/// Payload of a client → server frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    /// New user input.
    #[serde(rename = "user_message")]
    UserMessage {
        /// Text sent to the agent.
        text: String,
        /// Text shown in the conversation when it differs from `text`.
        #[serde(rename = "displayText", default, skip_serializing_if = "Option::is_none")]
        display_text: Option<String>,
        /// Attachment references.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
    },

    /// Ask the server to stop a running turn.
    #[serde(rename = "turn_interrupt")]
    TurnInterrupt {
        /// Turn to stop.
        #[serde(rename = "turnId")]
        turn_id: TurnId,
    },

    /// Request the model catalogue.
    #[serde(rename = "model_list")]
    ModelList,

    /// Switch the session's model.
    #[serde(rename = "model_set")]
    ModelSet {
        /// Model ID from the catalogue.
        model: String,
        /// Reasoning effort level.
        #[serde(rename = "reasoningEffort", default, skip_serializing_if = "Option::is_none")]
        reasoning_effort: Option<String>,
    },

    /// Heartbeat probe.
    #[serde(rename = "ping")]
    Ping,

    /// Open a terminal in the session's worktree.
    #[serde(rename = "terminal_init")]
    TerminalInit {
        /// Columns.
        cols: u16,
        /// Rows.
        rows: u16,
    },

    /// Resize the session's terminal.
    #[serde(rename = "terminal_resize")]
    TerminalResize {
        /// Columns.
        cols: u16,
        /// Rows.
        rows: u16,
    },

    /// Keystrokes for the session's terminal.
    #[serde(rename = "terminal_input")]
    TerminalInput {
        /// Raw input.
        data: String,
    },
}

/// A client → server frame scoped to a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// Target session; omitted for `main`.
    #[serde(rename = "worktreeId", default, skip_serializing_if = "Option::is_none")]
    pub worktree_id: Option<SessionId>,
    /// The payload.
    #[serde(flatten)]
    pub event: OutboundEvent,
}

impl OutboundFrame {
    /// Frame for `session`.
    #[must_use]
    pub fn new(session: &SessionId, event: OutboundEvent) -> Self {
        Self {
            worktree_id: (!session.is_main()).then(|| session.clone()),
            event,
        }
    }

    /// Frame without a session scope.
    #[must_use]
    pub fn unscoped(event: OutboundEvent) -> Self {
        Self {
            worktree_id: None,
            event,
        }
    }

    /// Heartbeat probe frame.
    #[must_use]
    pub fn ping() -> Self {
        Self::unscoped(OutboundEvent::Ping)
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; not expected for these types.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn encode(frame: &OutboundFrame) -> Value {
        serde_json::from_str(&frame.to_text().unwrap()).unwrap()
    }

    #[test]
    fn ping_is_bare() {
        assert_eq!(encode(&OutboundFrame::ping()), json!({"type": "ping"}));
    }

    #[test]
    fn main_session_omits_worktree_id() {
        let frame = OutboundFrame::new(&SessionId::main(), OutboundEvent::ModelList);
        assert_eq!(encode(&frame), json!({"type": "model_list"}));
    }

    #[test]
    fn worktree_session_is_tagged() {
        let frame = OutboundFrame::new(
            &SessionId::from("wt-1"),
            OutboundEvent::TurnInterrupt {
                turn_id: TurnId::from("t3"),
            },
        );
        assert_eq!(
            encode(&frame),
            json!({"type": "turn_interrupt", "turnId": "t3", "worktreeId": "wt-1"})
        );
    }

    #[test]
    fn user_message_fields() {
        let frame = OutboundFrame::new(
            &SessionId::main(),
            OutboundEvent::UserMessage {
                text: "expanded prompt".into(),
                display_text: Some("/fix".into()),
                attachments: Vec::new(),
            },
        );
        assert_eq!(
            encode(&frame),
            json!({"type": "user_message", "text": "expanded prompt", "displayText": "/fix"})
        );
    }

    #[test]
    fn model_set_with_effort() {
        let frame = OutboundFrame::new(
            &SessionId::main(),
            OutboundEvent::ModelSet {
                model: "gpt-5".into(),
                reasoning_effort: Some("high".into()),
            },
        );
        assert_eq!(
            encode(&frame),
            json!({"type": "model_set", "model": "gpt-5", "reasoningEffort": "high"})
        );
    }

    #[test]
    fn terminal_resize_fields() {
        let frame = OutboundFrame::new(
            &SessionId::from("wt-2"),
            OutboundEvent::TerminalResize { cols: 120, rows: 40 },
        );
        assert_eq!(
            encode(&frame),
            json!({"type": "terminal_resize", "cols": 120, "rows": 40, "worktreeId": "wt-2"})
        );
    }
}
