//! Plain-text rendering for the `tether` binary.

use std::fmt::Write as _;

use tether_core::{CommandStatus, Message, Role};
use tether_protocol::ModelInfo;
use tether_sync::{DisplayItem, SessionView, group_for_display};

use crate::update::ClientUpdate;

/// Render a session as a header plus its grouped conversation.
#[must_use]
pub fn render_session(view: &SessionView) -> String {
    let mut out = String::new();
    let _ = write!(out, "[{}] {}", view.id, view.status);
    if let Some(label) = &view.activity_label {
        let _ = write!(out, " ({label})");
    }
    if let Some(model) = &view.model {
        let _ = write!(out, " model={model}");
    }
    out.push('\n');
    if let Some(error) = &view.last_error {
        let _ = writeln!(out, "  ! {error}");
    }

    for item in group_for_display(&view.messages) {
        match item {
            DisplayItem::Message(message) => render_message(&mut out, message),
            DisplayItem::Activity(entries) => {
                let running = entries.iter().filter(|m| m.is_running()).count();
                let _ = write!(out, "  ┌ {} activity", entries.len());
                if running > 0 {
                    let _ = write!(out, ", {running} running");
                }
                out.push('\n');
                for entry in entries {
                    let _ = writeln!(out, "  │ {}", activity_line(entry));
                }
            }
        }
    }
    out
}

fn render_message(out: &mut String, message: &Message) {
    let who = match message.role {
        Role::User => "you",
        Role::Assistant => "agent",
        Role::CommandExecution | Role::ToolResult => "tool",
    };
    let cursor = if message.finalized { "" } else { " …" };
    let _ = writeln!(out, "  {who}: {}{cursor}", message.text);
}

fn activity_line(message: &Message) -> String {
    match message.role {
        Role::CommandExecution => {
            let command = message.command.as_deref().unwrap_or(&message.text);
            match (message.status, message.exit_code) {
                (Some(CommandStatus::Running), _) => format!("$ {command} (running)"),
                (_, Some(code)) => format!("$ {command} (exit {code})"),
                _ => format!("$ {command}"),
            }
        }
        _ => message.text.clone(),
    }
}

/// One line per model.
#[must_use]
pub fn render_models(models: &[ModelInfo]) -> String {
    models
        .iter()
        .map(|m| {
            let name = m.display_name.as_deref().unwrap_or(&m.id);
            match &m.provider {
                Some(provider) => format!("  {name} [{}] via {provider}", m.id),
                None => format!("  {name} [{}]", m.id),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text for an update, or `None` when it should not be printed.
///
/// Session views are only printed for the active session.
#[must_use]
pub fn render_update(update: &ClientUpdate, active: &tether_core::SessionId) -> Option<String> {
    match update {
        ClientUpdate::Connection(state) => Some(format!("* {state}")),
        ClientUpdate::Session(view) if &view.id == active => Some(render_session(view)),
        ClientUpdate::Session(_) | ClientUpdate::ResyncStarted { .. } => None,
        ClientUpdate::SessionCreated(id) => Some(format!("* session {id} opened")),
        ClientUpdate::SessionClosed(id) => Some(format!("* session {id} closed")),
        ClientUpdate::ActiveChanged(id) => Some(format!("* now viewing {id}")),
        ClientUpdate::Models(models) => Some(render_models(models)),
        ClientUpdate::TurnFailed {
            session_id,
            message,
        } => Some(format!("! turn failed in {session_id}: {message}")),
        ClientUpdate::SessionError {
            session_id,
            message,
        } => Some(format!("! {session_id}: {message}")),
        ClientUpdate::ResyncFinished { epoch } => Some(format!("* resync {epoch} done")),
        ClientUpdate::RetriesExhausted { attempts } => Some(format!(
            "! gave up reconnecting after {attempts} attempts; /connect to retry"
        )),
    }
}
