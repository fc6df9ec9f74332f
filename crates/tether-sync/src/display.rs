//! Presentation grouping.
//!
//! Renderers show runs of consecutive command executions and tool results
//! as one collapsible activity block. Grouping is computed on read; the
//! store itself is never reshaped.

use tether_core::Message;

/// One row of the rendered conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayItem<'a> {
    /// A user or assistant entry.
    Message(&'a Message),
    /// Consecutive activity entries.
    Activity(Vec<&'a Message>),
}

impl DisplayItem<'_> {
    /// Whether any entry in the row is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        match self {
            Self::Message(message) => message.is_running(),
            Self::Activity(entries) => entries.iter().any(|m| m.is_running()),
        }
    }
}

/// Collapse consecutive activity entries into groups.
pub fn group_for_display<'a>(messages: impl IntoIterator<Item = &'a Message>) -> Vec<DisplayItem<'a>> {
    let mut items: Vec<DisplayItem<'a>> = Vec::new();
    for message in messages {
        if !message.role.is_activity() {
            items.push(DisplayItem::Message(message));
            continue;
        }
        if let Some(DisplayItem::Activity(group)) = items.last_mut() {
            group.push(message);
        } else {
            items.push(DisplayItem::Activity(vec![message]));
        }
    }
    items
}
