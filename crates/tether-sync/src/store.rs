//! Per-session message store.
//!
//! A [`MessageStore`] is an insertion-ordered map from [`ItemId`] to
//! [`Message`]. Entries keep the position of their first appearance forever;
//! later events only mutate content in place.
//!
//! Every mutation is idempotent under replay:
//!
//! - a delta for a finalized entry is a no-op
//! - a completion that matches the stored value reports [`StoreChange::Unchanged`]
//! - user entries never change once recorded

use std::collections::HashMap;

use serde::{Serialize, Serializer};
use tether_core::{CommandStatus, ItemId, Message, Role, TurnId};
use tracing::debug;

/// What a store mutation did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreChange {
    /// A new entry was appended.
    Inserted(ItemId),
    /// An existing entry changed in place.
    Updated(ItemId),
    /// Open entries were finalized.
    Finalized(Vec<ItemId>),
    /// The whole store was rebuilt from a snapshot.
    Replaced,
    /// Nothing changed.
    Unchanged,
}

impl StoreChange {
    /// Whether renderers need to redraw.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        match self {
            Self::Unchanged => false,
            Self::Finalized(ids) => !ids.is_empty(),
            _ => true,
        }
    }
}

/// Ordered, de-duplicated conversation of one session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageStore {
    order: Vec<ItemId>,
    entries: HashMap<ItemId, Message>,
}

impl MessageStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the store has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Entry by ID.
    #[must_use]
    pub fn get(&self, id: &ItemId) -> Option<&Message> {
        self.entries.get(id)
    }

    /// Entries in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> + '_ {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    /// Owned copy of the entries in order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.iter().cloned().collect()
    }

    /// ID of the most recently appended entry (the replay cursor).
    #[must_use]
    pub fn last_id(&self) -> Option<&ItemId> {
        self.order.last()
    }

    fn push(&mut self, message: Message) -> StoreChange {
        let id = message.id.clone();
        self.order.push(id.clone());
        let _ = self.entries.insert(id.clone(), message);
        StoreChange::Inserted(id)
    }

    /// Create-or-append streaming text.
    pub fn apply_delta(
        &mut self,
        id: ItemId,
        role: Role,
        delta: &str,
        turn_id: Option<TurnId>,
    ) -> StoreChange {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.finalized => {
                debug!(item_id = %id, "delta for finalized entry ignored");
                StoreChange::Unchanged
            }
            Some(_) if delta.is_empty() => StoreChange::Unchanged,
            Some(entry) => {
                entry.text.push_str(delta);
                StoreChange::Updated(id)
            }
            None => {
                let mut message = Message::streaming(id, role, delta);
                message.turn_id = turn_id;
                self.push(message)
            }
        }
    }

    /// Create-or-replace with the authoritative final text.
    pub fn apply_complete(
        &mut self,
        id: ItemId,
        role: Role,
        text: String,
        turn_id: Option<TurnId>,
    ) -> StoreChange {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.role == Role::User => {
                if entry.text != text {
                    debug!(item_id = %id, "user entry is immutable, completion ignored");
                }
                StoreChange::Unchanged
            }
            Some(entry) => {
                let mut changed = false;
                if entry.text != text {
                    entry.text = text;
                    changed = true;
                }
                if !entry.finalized {
                    entry.finalized = true;
                    changed = true;
                }
                if entry.is_running() {
                    entry.status = Some(CommandStatus::Completed);
                    changed = true;
                }
                if entry.turn_id.is_none() && turn_id.is_some() {
                    entry.turn_id = turn_id;
                    changed = true;
                }
                if changed {
                    StoreChange::Updated(id)
                } else {
                    StoreChange::Unchanged
                }
            }
            None => {
                let mut message = Message::finalized(id, role, text);
                message.turn_id = turn_id;
                self.push(message)
            }
        }
    }

    /// Create-or-replace with a whole authoritative entry.
    ///
    /// Used for replayed history and recorded user entries, which carry
    /// attachments and command metadata in addition to text.
    pub fn merge_complete(&mut self, message: Message) -> StoreChange {
        let id = message.id.clone();
        match self.entries.get_mut(&id) {
            Some(entry) if entry.role == Role::User => StoreChange::Unchanged,
            Some(entry) if *entry == message => StoreChange::Unchanged,
            Some(entry) => {
                *entry = message;
                StoreChange::Updated(id)
            }
            None => self.push(message),
        }
    }

    /// Register a command execution the agent just started.
    pub fn command_started(
        &mut self,
        id: ItemId,
        command: Option<String>,
        turn_id: Option<TurnId>,
    ) -> StoreChange {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.finalized => StoreChange::Unchanged,
            Some(entry) => match command {
                Some(command) if entry.command.as_deref() != Some(command.as_str()) => {
                    entry.command = Some(command);
                    StoreChange::Updated(id)
                }
                _ => StoreChange::Unchanged,
            },
            None => {
                let mut message = Message::streaming(id, Role::CommandExecution, "");
                message.command = command;
                message.turn_id = turn_id;
                self.push(message)
            }
        }
    }

    /// Finish a command execution.
    ///
    /// `aggregated_output` replaces the accumulated deltas when present;
    /// otherwise the accumulated output is kept.
    pub fn command_completed(
        &mut self,
        id: ItemId,
        aggregated_output: Option<String>,
        exit_code: Option<i32>,
        command: Option<String>,
    ) -> StoreChange {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                let mut changed = false;
                if let Some(output) = aggregated_output {
                    if entry.text != output {
                        entry.text = output;
                        changed = true;
                    }
                }
                if entry.status != Some(CommandStatus::Completed) {
                    entry.status = Some(CommandStatus::Completed);
                    changed = true;
                }
                if !entry.finalized {
                    entry.finalized = true;
                    changed = true;
                }
                if exit_code.is_some() && entry.exit_code != exit_code {
                    entry.exit_code = exit_code;
                    changed = true;
                }
                if command.is_some() && entry.command != command {
                    entry.command = command;
                    changed = true;
                }
                if changed {
                    StoreChange::Updated(id)
                } else {
                    StoreChange::Unchanged
                }
            }
            None => {
                let mut message = Message::finalized(
                    id,
                    Role::CommandExecution,
                    aggregated_output.unwrap_or_default(),
                );
                message.exit_code = exit_code;
                message.command = command;
                self.push(message)
            }
        }
    }

    /// Rebuild from an authoritative snapshot.
    ///
    /// Duplicate IDs keep the position of their first occurrence and the
    /// content of their last.
    pub fn replace_all(&mut self, messages: Vec<Message>) -> StoreChange {
        let mut order = Vec::with_capacity(messages.len());
        let mut entries = HashMap::with_capacity(messages.len());
        for message in messages {
            let id = message.id.clone();
            if entries.insert(id.clone(), message).is_none() {
                order.push(id);
            }
        }
        self.order = order;
        self.entries = entries;
        StoreChange::Replaced
    }

    /// Finalize every open entry and complete every running command.
    pub fn finalize_open(&mut self) -> StoreChange {
        let mut finalized = Vec::new();
        for id in &self.order {
            let Some(entry) = self.entries.get_mut(id) else {
                continue;
            };
            if entry.finalized && !entry.is_running() {
                continue;
            }
            entry.finalized = true;
            if entry.is_running() {
                entry.status = Some(CommandStatus::Completed);
            }
            finalized.push(id.clone());
        }
        if finalized.is_empty() {
            StoreChange::Unchanged
        } else {
            StoreChange::Finalized(finalized)
        }
    }
}

impl Serialize for MessageStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn id(s: &str) -> ItemId {
        ItemId::from(s)
    }

    fn texts(store: &MessageStore) -> Vec<&str> {
        store.iter().map(|m| m.text.as_str()).collect()
    }

    #[test]
    fn delta_accumulates() {
        let mut store = MessageStore::new();
        assert_matches!(
            store.apply_delta(id("m1"), Role::Assistant, "He", None),
            StoreChange::Inserted(_)
        );
        assert_matches!(
            store.apply_delta(id("m1"), Role::Assistant, "llo", None),
            StoreChange::Updated(_)
        );
        assert_eq!(texts(&store), vec!["Hello"]);
        assert!(!store.get(&id("m1")).unwrap().finalized);
    }

    #[test]
    fn empty_delta_on_existing_entry_is_unchanged() {
        let mut store = MessageStore::new();
        let _ = store.apply_delta(id("m1"), Role::Assistant, "x", None);
        assert_eq!(
            store.apply_delta(id("m1"), Role::Assistant, "", None),
            StoreChange::Unchanged
        );
    }

    #[test]
    fn completion_overrides_drift() {
        let mut store = MessageStore::new();
        let _ = store.apply_delta(id("m1"), Role::Assistant, "Hel", None);
        let change = store.apply_complete(id("m1"), Role::Assistant, "Hello world".into(), None);
        assert_eq!(change, StoreChange::Updated(id("m1")));
        assert_eq!(texts(&store), vec!["Hello world"]);
        assert!(store.get(&id("m1")).unwrap().finalized);
    }

    #[test]
    fn delta_after_completion_is_noop() {
        let mut store = MessageStore::new();
        let _ = store.apply_complete(id("m1"), Role::Assistant, "done".into(), None);
        assert_eq!(
            store.apply_delta(id("m1"), Role::Assistant, " more", None),
            StoreChange::Unchanged
        );
        assert_eq!(texts(&store), vec!["done"]);
    }

    #[test]
    fn repeated_completion_is_unchanged() {
        let mut store = MessageStore::new();
        let _ = store.apply_complete(id("m1"), Role::Assistant, "final".into(), None);
        assert_eq!(
            store.apply_complete(id("m1"), Role::Assistant, "final".into(), None),
            StoreChange::Unchanged
        );
    }

    #[test]
    fn user_entries_are_immutable() {
        let mut store = MessageStore::new();
        let _ = store.apply_complete(id("u1"), Role::User, "original".into(), None);
        assert_eq!(
            store.apply_complete(id("u1"), Role::User, "edited".into(), None),
            StoreChange::Unchanged
        );
        assert_eq!(
            store.merge_complete(Message::finalized(id("u1"), Role::User, "again")),
            StoreChange::Unchanged
        );
        assert_eq!(texts(&store), vec!["original"]);
    }

    #[test]
    fn order_follows_first_appearance() {
        let mut store = MessageStore::new();
        let _ = store.apply_delta(id("a"), Role::Assistant, "1", None);
        let _ = store.apply_delta(id("b"), Role::Assistant, "2", None);
        let _ = store.apply_delta(id("a"), Role::Assistant, "1", None);
        let _ = store.apply_complete(id("c"), Role::Assistant, "3".into(), None);
        let _ = store.apply_complete(id("a"), Role::Assistant, "final".into(), None);
        let ids: Vec<&str> = store.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(store.last_id(), Some(&id("c")));
    }

    #[test]
    fn command_lifecycle() {
        let mut store = MessageStore::new();
        let _ = store.command_started(id("c1"), Some("cargo test".into()), None);
        assert!(store.get(&id("c1")).unwrap().is_running());
        let _ = store.apply_delta(id("c1"), Role::CommandExecution, "running 3 tests\n", None);
        let change = store.command_completed(id("c1"), Some("ok: 3 passed\n".into()), Some(0), None);
        assert_eq!(change, StoreChange::Updated(id("c1")));

        let entry = store.get(&id("c1")).unwrap();
        assert_eq!(entry.status, Some(CommandStatus::Completed));
        assert_eq!(entry.text, "ok: 3 passed\n");
        assert_eq!(entry.exit_code, Some(0));
        assert_eq!(entry.command.as_deref(), Some("cargo test"));
    }

    #[test]
    fn command_completed_without_aggregate_keeps_output() {
        let mut store = MessageStore::new();
        let _ = store.apply_delta(id("c1"), Role::CommandExecution, "partial", None);
        let _ = store.command_completed(id("c1"), None, Some(1), None);
        let entry = store.get(&id("c1")).unwrap();
        assert_eq!(entry.text, "partial");
        assert_eq!(entry.exit_code, Some(1));
        assert!(!entry.is_running());
    }

    #[test]
    fn command_delta_after_completion_never_resurrects_running() {
        let mut store = MessageStore::new();
        let _ = store.command_completed(id("c1"), Some("out".into()), Some(0), None);
        let _ = store.apply_delta(id("c1"), Role::CommandExecution, "late", None);
        let _ = store.command_started(id("c1"), None, None);
        let entry = store.get(&id("c1")).unwrap();
        assert_eq!(entry.status, Some(CommandStatus::Completed));
        assert_eq!(entry.text, "out");
    }

    #[test]
    fn replace_all_keeps_first_position_last_content() {
        let mut store = MessageStore::new();
        let _ = store.apply_delta(id("old"), Role::Assistant, "gone", None);
        let change = store.replace_all(vec![
            Message::finalized(id("m1"), Role::User, "q"),
            Message::finalized(id("m2"), Role::Assistant, "first"),
            Message::finalized(id("m3"), Role::Assistant, "x"),
            Message::finalized(id("m2"), Role::Assistant, "second"),
        ]);
        assert_eq!(change, StoreChange::Replaced);
        assert_eq!(texts(&store), vec!["q", "second", "x"]);
        assert!(store.get(&id("old")).is_none());
    }

    #[test]
    fn finalize_open_closes_streaming_entries() {
        let mut store = MessageStore::new();
        let _ = store.apply_delta(id("a1"), Role::Assistant, "partial", None);
        let _ = store.command_started(id("c1"), None, None);
        let _ = store.apply_complete(id("a2"), Role::Assistant, "done".into(), None);

        let change = store.finalize_open();
        assert_eq!(change, StoreChange::Finalized(vec![id("a1"), id("c1")]));
        assert!(store.iter().all(|m| m.finalized && !m.is_running()));
        assert_eq!(store.finalize_open(), StoreChange::Unchanged);
    }

    #[test]
    fn merge_complete_replaces_content_in_place() {
        let mut store = MessageStore::new();
        let _ = store.apply_delta(id("m1"), Role::Assistant, "dr", None);
        let _ = store.apply_delta(id("m2"), Role::Assistant, "next", None);
        let mut authoritative = Message::finalized(id("m1"), Role::Assistant, "draft");
        authoritative.turn_id = Some(TurnId::from("t1"));
        assert_eq!(
            store.merge_complete(authoritative.clone()),
            StoreChange::Updated(id("m1"))
        );
        assert_eq!(store.merge_complete(authoritative), StoreChange::Unchanged);
        assert_eq!(texts(&store), vec!["draft", "next"]);
    }

    #[test]
    fn serializes_in_order() {
        let mut store = MessageStore::new();
        let _ = store.apply_complete(id("m2"), Role::Assistant, "b".into(), None);
        let _ = store.apply_complete(id("m1"), Role::Assistant, "a".into(), None);
        let json = serde_json::to_value(&store).unwrap();
        assert_eq!(json[0]["id"], "m2");
        assert_eq!(json[1]["id"], "m1");
    }

    #[test]
    fn store_change_is_changed() {
        assert!(!StoreChange::Unchanged.is_changed());
        assert!(!StoreChange::Finalized(Vec::new()).is_changed());
        assert!(StoreChange::Replaced.is_changed());
        assert!(StoreChange::Inserted(id("x")).is_changed());
    }
}
