//! Conversation entries.
//!
//! A [`Message`] is one entry of a session's conversation. Assistant and
//! command-execution entries grow in place while the server streams them;
//! user entries are immutable once recorded. The wire format is camelCase
//! JSON, shared by live frames, snapshots, and replay batches.

use serde::{Deserialize, Serialize};

use crate::ids::{ItemId, TurnId};

/// Author/kind of a conversation entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    /// Text typed by the human.
    User,
    /// Agent response text.
    Assistant,
    /// A shell command run by the agent, with its output as text.
    CommandExecution,
    /// Output of a non-shell tool invocation.
    ToolResult,
}

impl Role {
    /// Whether entries of this role collapse into activity groups for display.
    #[must_use]
    pub fn is_activity(self) -> bool {
        matches!(self, Self::CommandExecution | Self::ToolResult)
    }
}

/// Progress of a command execution entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandStatus {
    /// Output is still streaming.
    Running,
    /// The server reported the aggregate output.
    Completed,
}

/// Reference to an attachment stored outside the conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Storage identifier.
    pub id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Fetchable location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

fn default_finalized() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

/// One conversation entry.
///
/// Entries deserialized from the server (snapshots, replay) default to
/// `finalized = true`: stored history is authoritative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-issued ID, unique within the session.
    pub id: ItemId,
    /// Entry kind.
    pub role: Role,
    /// Accumulated text (or command output).
    #[serde(default)]
    pub text: String,
    /// Ordered attachment references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Command progress (command executions only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CommandStatus>,
    /// Command line (command executions only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Process exit code once the command completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Turn that produced the entry, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<TurnId>,
    /// Whether the server's final value has been applied.
    #[serde(default = "default_finalized", skip_serializing_if = "is_true")]
    pub finalized: bool,
}

impl Message {
    /// A streaming (not yet finalized) entry.
    #[must_use]
    pub fn streaming(id: ItemId, role: Role, text: impl Into<String>) -> Self {
        Self {
            id,
            status: (role == Role::CommandExecution).then_some(CommandStatus::Running),
            role,
            text: text.into(),
            attachments: Vec::new(),
            command: None,
            exit_code: None,
            turn_id: None,
            finalized: false,
        }
    }

    /// A finalized entry carrying the authoritative text.
    #[must_use]
    pub fn finalized(id: ItemId, role: Role, text: impl Into<String>) -> Self {
        Self {
            id,
            status: (role == Role::CommandExecution).then_some(CommandStatus::Completed),
            role,
            text: text.into(),
            attachments: Vec::new(),
            command: None,
            exit_code: None,
            turn_id: None,
            finalized: true,
        }
    }

    /// Attach references (builder style).
    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Whether a command execution is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == Some(CommandStatus::Running)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
