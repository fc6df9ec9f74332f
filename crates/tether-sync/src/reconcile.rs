//! The reconciliation reducer.
//!
//! [`reduce`] is the pure `(store, event) -> store` form; [`apply`] is the
//! in-place form the session registry uses and reports a [`StoreChange`].
//! Both are deterministic: the same event sequence always yields the same
//! store.

use tether_core::{ItemId, Message, Role, TurnId};
use tether_protocol::InboundEvent;

use crate::store::{MessageStore, StoreChange};

/// `itemType` the agent reports for shell command executions.
pub const COMMAND_ITEM_TYPE: &str = "commandExecution";

/// A mutation of one session's conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    /// Streaming fragment: create-or-append.
    Delta {
        /// Entry.
        item_id: ItemId,
        /// Entry kind for a newly created entry.
        role: Role,
        /// Fragment.
        text: String,
        /// Producing turn.
        turn_id: Option<TurnId>,
    },
    /// Authoritative final text: create-or-replace.
    Complete {
        /// Entry.
        item_id: ItemId,
        /// Entry kind for a newly created entry.
        role: Role,
        /// Full text.
        text: String,
        /// Producing turn.
        turn_id: Option<TurnId>,
    },
    /// Authoritative whole entry (replayed history, recorded user input).
    CompleteMessage(Message),
    /// A command execution started.
    CommandStarted {
        /// Entry.
        item_id: ItemId,
        /// Command line.
        command: Option<String>,
        /// Producing turn.
        turn_id: Option<TurnId>,
    },
    /// Command output fragment.
    CommandDelta {
        /// Entry.
        item_id: ItemId,
        /// Output fragment.
        text: String,
    },
    /// A command execution finished.
    CommandCompleted {
        /// Entry.
        item_id: ItemId,
        /// Complete output, when the server sends it.
        aggregated_output: Option<String>,
        /// Exit code.
        exit_code: Option<i32>,
        /// Command line.
        command: Option<String>,
    },
    /// Replace everything with an authoritative snapshot.
    FullReplace(Vec<Message>),
    /// Finalize every open entry.
    FinalizeOpen,
}

impl StoreEvent {
    /// Map a live frame onto a store mutation, if it is one.
    #[must_use]
    pub fn from_inbound(event: InboundEvent) -> Option<Self> {
        let store_event = match event {
            InboundEvent::AssistantDelta {
                item_id,
                delta,
                turn_id,
            } => Self::Delta {
                item_id,
                role: Role::Assistant,
                text: delta,
                turn_id,
            },
            InboundEvent::AssistantMessage {
                item_id,
                text,
                turn_id,
            } => Self::Complete {
                item_id,
                role: Role::Assistant,
                text,
                turn_id,
            },
            InboundEvent::UserMessage {
                item_id,
                text,
                attachments,
            } => Self::CompleteMessage(
                Message::finalized(item_id, Role::User, text).with_attachments(attachments),
            ),
            InboundEvent::CommandExecutionDelta { item_id, delta } => Self::CommandDelta {
                item_id,
                text: delta,
            },
            InboundEvent::CommandExecutionCompleted {
                item_id,
                aggregated_output,
                exit_code,
                command,
            } => Self::CommandCompleted {
                item_id,
                aggregated_output,
                exit_code,
                command,
            },
            InboundEvent::ItemStarted {
                item_id,
                item_type,
                command,
            } if item_type == COMMAND_ITEM_TYPE => Self::CommandStarted {
                item_id,
                command,
                turn_id: None,
            },
            _ => return None,
        };
        Some(store_event)
    }
}

/// Apply `event` to `store` in place.
pub fn apply(store: &mut MessageStore, event: StoreEvent) -> StoreChange {
    match event {
        StoreEvent::Delta {
            item_id,
            role,
            text,
            turn_id,
        } => store.apply_delta(item_id, role, &text, turn_id),
        StoreEvent::Complete {
            item_id,
            role,
            text,
            turn_id,
        } => store.apply_complete(item_id, role, text, turn_id),
        StoreEvent::CompleteMessage(message) => store.merge_complete(message),
        StoreEvent::CommandStarted {
            item_id,
            command,
            turn_id,
        } => store.command_started(item_id, command, turn_id),
        StoreEvent::CommandDelta { item_id, text } => {
            store.apply_delta(item_id, Role::CommandExecution, &text, None)
        }
        StoreEvent::CommandCompleted {
            item_id,
            aggregated_output,
            exit_code,
            command,
        } => store.command_completed(item_id, aggregated_output, exit_code, command),
        StoreEvent::FullReplace(messages) => store.replace_all(messages),
        StoreEvent::FinalizeOpen => store.finalize_open(),
    }
}

/// Pure reducer: consume `store`, return the next store.
#[must_use]
pub fn reduce(mut store: MessageStore, event: StoreEvent) -> MessageStore {
    let _ = apply(&mut store, event);
    store
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn delta(id: &str, text: &str) -> StoreEvent {
        StoreEvent::Delta {
            item_id: ItemId::from(id),
            role: Role::Assistant,
            text: text.into(),
            turn_id: None,
        }
    }

    fn complete(id: &str, text: &str) -> StoreEvent {
        StoreEvent::Complete {
            item_id: ItemId::from(id),
            role: Role::Assistant,
            text: text.into(),
            turn_id: None,
        }
    }

    fn fold(events: impl IntoIterator<Item = StoreEvent>) -> MessageStore {
        events.into_iter().fold(MessageStore::new(), reduce)
    }

    #[test]
    fn reduce_delta_sequence() {
        let store = fold([delta("m1", "He"), delta("m1", "llo")]);
        assert_eq!(store.get(&ItemId::from("m1")).unwrap().text, "Hello");
    }

    #[test]
    fn from_inbound_maps_streaming_frames() {
        let event = InboundEvent::AssistantDelta {
            item_id: ItemId::from("m1"),
            delta: "Hi".into(),
            turn_id: Some(TurnId::from("t1")),
        };
        assert_eq!(
            StoreEvent::from_inbound(event),
            Some(StoreEvent::Delta {
                item_id: ItemId::from("m1"),
                role: Role::Assistant,
                text: "Hi".into(),
                turn_id: Some(TurnId::from("t1")),
            })
        );
    }

    #[test]
    fn from_inbound_command_item_started() {
        let event = InboundEvent::ItemStarted {
            item_id: ItemId::from("c1"),
            item_type: "commandExecution".into(),
            command: Some("ls".into()),
        };
        assert!(matches!(
            StoreEvent::from_inbound(event),
            Some(StoreEvent::CommandStarted { .. })
        ));

        let reasoning = InboundEvent::ItemStarted {
            item_id: ItemId::from("r1"),
            item_type: "reasoning".into(),
            command: None,
        };
        assert_eq!(StoreEvent::from_inbound(reasoning), None);
    }

    #[test]
    fn from_inbound_ignores_non_message_frames() {
        assert_eq!(StoreEvent::from_inbound(InboundEvent::Pong), None);
        assert_eq!(
            StoreEvent::from_inbound(InboundEvent::TurnCompleted { turn_id: None }),
            None
        );
    }

    #[test]
    fn user_message_keeps_attachments() {
        let event = InboundEvent::UserMessage {
            item_id: ItemId::from("u1"),
            text: "see".into(),
            attachments: vec![tether_core::Attachment {
                id: "a1".into(),
                name: None,
                mime_type: None,
                url: None,
            }],
        };
        let store = fold(StoreEvent::from_inbound(event));
        let entry = store.get(&ItemId::from("u1")).unwrap();
        assert_eq!(entry.role, Role::User);
        assert_eq!(entry.attachments.len(), 1);
    }

    fn chunk() -> impl Strategy<Value = String> {
        "[a-z ]{0,6}"
    }

    proptest! {
        #[test]
        fn delta_accumulation_concatenates(chunks in prop::collection::vec(chunk(), 1..20)) {
            let store = fold(chunks.iter().map(|c| delta("m1", c)));
            prop_assert_eq!(&store.get(&ItemId::from("m1")).unwrap().text, &chunks.concat());
        }

        #[test]
        fn order_is_first_seen(ids in prop::collection::vec(0u8..6, 1..40)) {
            let store = fold(ids.iter().map(|i| delta(&format!("m{i}"), "x")));
            let mut expected: Vec<String> = Vec::new();
            for i in &ids {
                let name = format!("m{i}");
                if !expected.contains(&name) {
                    expected.push(name);
                }
            }
            let actual: Vec<String> = store.iter().map(|m| m.id.to_string()).collect();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn replay_is_idempotent(
            live in prop::collection::vec((0u8..5, chunk(), any::<bool>()), 0..30),
            history in prop::collection::vec((0u8..5, chunk()), 0..10),
        ) {
            let live_events = live.iter().map(|(i, text, done)| {
                let id = format!("m{i}");
                if *done { complete(&id, text) } else { delta(&id, text) }
            });
            let store = fold(live_events);
            let replay: Vec<StoreEvent> = history
                .iter()
                .map(|(i, text)| {
                    StoreEvent::CompleteMessage(Message::finalized(
                        ItemId::from(format!("m{i}")),
                        Role::Assistant,
                        text.clone(),
                    ))
                })
                .collect();

            let once = replay.iter().cloned().fold(store, reduce);
            let twice = replay.iter().cloned().fold(once.clone(), reduce);
            prop_assert_eq!(
                serde_json::to_string(&once).unwrap(),
                serde_json::to_string(&twice).unwrap()
            );
        }

        #[test]
        fn completion_always_wins(prefix in chunk(), fin in chunk(), tail in chunk()) {
            let store = fold([delta("m1", &prefix), complete("m1", &fin), delta("m1", &tail)]);
            prop_assert_eq!(&store.get(&ItemId::from("m1")).unwrap().text, &fin);
        }
    }
}
