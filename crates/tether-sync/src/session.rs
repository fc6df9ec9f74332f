//! One session's state.
//!
//! A [`Session`] owns its [`MessageStore`] and tracks the turn in progress.
//! The invariant `status == Processing` ⇔ `current_turn_id.is_some()` holds
//! after every public method. Lifecycle statuses that arrive while a turn is
//! running are parked and applied when the turn ends.

use std::collections::VecDeque;

use serde::Serialize;
use tether_core::{ItemId, Message, SessionId, SessionStatus, TurnId};
use tether_protocol::{OutboundEvent, RpcLogEntry, SessionSnapshot, TransientState, WorktreeInfo};
use tracing::{debug, info, warn};

use crate::reconcile::{self, StoreEvent};
use crate::store::{MessageStore, StoreChange};

/// Result of a turn-ending event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnEnd {
    /// The turn ended; open entries were finalized.
    Ended {
        /// The turn that ended.
        turn_id: TurnId,
        /// Entries finalized because the turn ended.
        finalized: Vec<ItemId>,
    },
    /// The event referenced another turn (or none was running).
    Ignored,
}

/// One session (the main line of work or a worktree).
#[derive(Clone, Debug)]
pub struct Session {
    id: SessionId,
    name: String,
    branch_name: Option<String>,
    provider: Option<String>,
    model: Option<String>,
    reasoning_effort: Option<String>,
    status: SessionStatus,
    pending_status: Option<SessionStatus>,
    messages: MessageStore,
    current_turn_id: Option<TurnId>,
    activity_label: Option<String>,
    last_error: Option<String>,
    repo_diff: Option<String>,
    logs: VecDeque<RpcLogEntry>,
    log_limit: usize,
}

impl Session {
    /// Session from server metadata.
    #[must_use]
    pub fn new(info: &WorktreeInfo, log_limit: usize) -> Self {
        let mut session = Self {
            id: info.id.clone(),
            name: info.name.clone(),
            branch_name: None,
            provider: None,
            model: None,
            reasoning_effort: None,
            status: SessionStatus::Ready,
            pending_status: None,
            messages: MessageStore::new(),
            current_turn_id: None,
            activity_label: None,
            last_error: None,
            repo_diff: None,
            logs: VecDeque::new(),
            log_limit,
        };
        let _ = session.apply_info(info);
        session
    }

    /// The always-present main session.
    #[must_use]
    pub fn main(log_limit: usize) -> Self {
        Self::new(&WorktreeInfo::bare(SessionId::main()), log_limit)
    }

    /// Session ID.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Lifecycle status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Turn in progress.
    #[must_use]
    pub fn current_turn_id(&self) -> Option<&TurnId> {
        self.current_turn_id.as_ref()
    }

    /// Conversation.
    #[must_use]
    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    /// Provider serving the session.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    /// Model in use.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Activity label.
    #[must_use]
    pub fn activity_label(&self) -> Option<&str> {
        self.activity_label.as_deref()
    }

    /// Last turn-level or session-level error.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Latest repository diff.
    #[must_use]
    pub fn repo_diff(&self) -> Option<&str> {
        self.repo_diff.as_deref()
    }

    /// Retained RPC log lines, oldest first.
    pub fn logs(&self) -> impl Iterator<Item = &RpcLogEntry> + '_ {
        self.logs.iter()
    }

    /// Replay cursor: the last locally-seen message ID.
    #[must_use]
    pub fn cursor(&self) -> Option<ItemId> {
        self.messages.last_id().cloned()
    }

    // ── Metadata ────────────────────────────────────────────────────

    /// Apply server metadata. Returns whether anything changed.
    pub fn apply_info(&mut self, info: &WorktreeInfo) -> bool {
        let mut changed = false;
        if !info.name.is_empty() && self.name != info.name {
            self.name.clone_from(&info.name);
            changed = true;
        }
        changed |= replace_if_some(&mut self.branch_name, info.branch_name.as_ref());
        changed |= replace_if_some(&mut self.provider, info.provider.as_ref());
        changed |= replace_if_some(&mut self.model, info.model.as_ref());
        changed |= replace_if_some(&mut self.reasoning_effort, info.reasoning_effort.as_ref());
        changed |= self.apply_lifecycle_status(info.status);
        changed
    }

    /// Set provider and model. Returns the previous provider when it
    /// differed from a new, known one.
    pub fn set_model(
        &mut self,
        provider: Option<String>,
        model: Option<String>,
        reasoning_effort: Option<String>,
    ) -> Option<String> {
        let switched = match (&self.provider, &provider) {
            (Some(old), Some(new)) if old != new => Some(old.clone()),
            _ => None,
        };
        if provider.is_some() {
            self.provider = provider;
        }
        if model.is_some() {
            self.model = model;
        }
        if reasoning_effort.is_some() {
            self.reasoning_effort = reasoning_effort;
        }
        switched
    }

    /// Apply a lifecycle status. Returns whether the visible status changed.
    ///
    /// `Processing` is owned by turn events and never applied from here.
    /// Any other status arriving mid-turn is deferred until the turn ends.
    pub fn apply_lifecycle_status(&mut self, status: SessionStatus) -> bool {
        if status.is_turn_driven() {
            if self.current_turn_id.is_none() {
                debug!(session_id = %self.id, "processing status without a turn ignored");
            }
            return false;
        }
        if self.current_turn_id.is_some() {
            debug!(session_id = %self.id, %status, "lifecycle status deferred until turn ends");
            self.pending_status = Some(status);
            return false;
        }
        if self.status == status {
            return false;
        }
        info!(session_id = %self.id, from = %self.status, to = %status, "session status changed");
        self.status = status;
        true
    }

    /// Set the activity label. Returns whether it changed.
    pub fn set_activity(&mut self, label: Option<String>) -> bool {
        if self.activity_label == label {
            return false;
        }
        self.activity_label = label;
        true
    }

    /// Record a session-scoped error.
    pub fn set_error(&mut self, message: String) {
        self.last_error = Some(message);
    }

    /// Replace the repository diff. Returns whether it changed.
    pub fn set_diff(&mut self, diff: String) -> bool {
        if self.repo_diff.as_deref() == Some(diff.as_str()) {
            return false;
        }
        self.repo_diff = Some(diff);
        true
    }

    /// Append an RPC log line, evicting the oldest past the limit.
    pub fn push_log(&mut self, entry: RpcLogEntry) {
        self.logs.push_back(entry);
        while self.logs.len() > self.log_limit {
            let _ = self.logs.pop_front();
        }
    }

    // ── Conversation ────────────────────────────────────────────────

    /// Apply a store mutation.
    pub fn apply_store_event(&mut self, event: StoreEvent) -> StoreChange {
        reconcile::apply(&mut self.messages, event)
    }

    // ── Turns ───────────────────────────────────────────────────────

    /// A turn began.
    pub fn turn_started(&mut self, turn_id: TurnId) {
        if let Some(previous) = &self.current_turn_id {
            if *previous != turn_id {
                debug!(session_id = %self.id, %previous, next = %turn_id, "turn replaced without completion");
            }
        }
        info!(session_id = %self.id, %turn_id, "turn started");
        self.current_turn_id = Some(turn_id);
        self.status = SessionStatus::Processing;
        self.last_error = None;
    }

    /// A turn ended, normally (`error == None`) or with a failure.
    ///
    /// A missing `turn_id` matches the current turn; a different one is
    /// stale and ignored.
    pub fn turn_ended(&mut self, turn_id: Option<&TurnId>, error: Option<String>) -> TurnEnd {
        match (&self.current_turn_id, turn_id) {
            (None, _) => {
                debug!(session_id = %self.id, "turn end without an active turn ignored");
                return TurnEnd::Ignored;
            }
            (Some(current), Some(id)) if current != id => {
                debug!(session_id = %self.id, %current, stale = %id, "turn end for a stale turn ignored");
                return TurnEnd::Ignored;
            }
            _ => {}
        }
        let Some(ended) = self.current_turn_id.take() else {
            return TurnEnd::Ignored;
        };
        let failed = error.is_some();
        if let Some(message) = error {
            warn!(session_id = %self.id, turn_id = %ended, %message, "turn failed");
            self.last_error = Some(message);
        } else {
            info!(session_id = %self.id, turn_id = %ended, "turn completed");
        }

        let fallback = if failed {
            SessionStatus::Error
        } else {
            SessionStatus::Ready
        };
        self.status = self.pending_status.take().unwrap_or(fallback);
        self.activity_label = None;

        let finalized = match self.messages.finalize_open() {
            StoreChange::Finalized(ids) => ids,
            _ => Vec::new(),
        };
        TurnEnd::Ended {
            turn_id: ended,
            finalized,
        }
    }

    /// Interrupt request for the running turn. The turn stays current until
    /// the server confirms it ended.
    #[must_use]
    pub fn interrupt(&self) -> Option<OutboundEvent> {
        self.current_turn_id
            .as_ref()
            .map(|turn_id| OutboundEvent::TurnInterrupt {
                turn_id: turn_id.clone(),
            })
    }

    // ── Resync ──────────────────────────────────────────────────────

    /// Overwrite transient fields with authoritative values.
    ///
    /// When the server reports no active turn, open entries left by a
    /// connection that died mid-turn are finalized.
    pub fn reconcile_transient(&mut self, state: &TransientState) -> StoreChange {
        self.pending_status = None;
        self.activity_label.clone_from(&state.activity_label);
        self.current_turn_id.clone_from(&state.current_turn_id);

        if self.current_turn_id.is_some() {
            self.status = SessionStatus::Processing;
            return StoreChange::Unchanged;
        }

        self.status = if state.status.is_turn_driven() {
            warn!(session_id = %self.id, "server reports processing without a turn, treating as ready");
            SessionStatus::Ready
        } else {
            state.status
        };
        self.messages.finalize_open()
    }

    /// Apply a full snapshot.
    pub fn apply_snapshot(&mut self, snapshot: SessionSnapshot) -> StoreChange {
        let _ = self.messages.replace_all(snapshot.messages);
        if let Some(diff) = snapshot.diff {
            self.repo_diff = Some(diff);
        }
        if !snapshot.logs.is_empty() {
            self.logs = snapshot.logs.into();
            while self.logs.len() > self.log_limit {
                let _ = self.logs.pop_front();
            }
        }
        let _ = self.reconcile_transient(&snapshot.state);
        StoreChange::Replaced
    }

    /// Read-only copy for renderers.
    #[must_use]
    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id.clone(),
            name: self.name.clone(),
            branch_name: self.branch_name.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            reasoning_effort: self.reasoning_effort.clone(),
            status: self.status,
            current_turn_id: self.current_turn_id.clone(),
            activity_label: self.activity_label.clone(),
            last_error: self.last_error.clone(),
            repo_diff: self.repo_diff.clone(),
            messages: self.messages.snapshot(),
        }
    }
}

fn replace_if_some(slot: &mut Option<String>, value: Option<&String>) -> bool {
    match value {
        Some(value) if slot.as_ref() != Some(value) => {
            *slot = Some(value.clone());
            true
        }
        _ => false,
    }
}

/// Read-only snapshot of a session handed to renderers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// Session ID.
    pub id: SessionId,
    /// Display name.
    pub name: String,
    /// Git branch.
    pub branch_name: Option<String>,
    /// Provider.
    pub provider: Option<String>,
    /// Model.
    pub model: Option<String>,
    /// Reasoning effort.
    pub reasoning_effort: Option<String>,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Turn in progress.
    pub current_turn_id: Option<TurnId>,
    /// Activity label.
    pub activity_label: Option<String>,
    /// Last error.
    pub last_error: Option<String>,
    /// Latest diff.
    pub repo_diff: Option<String>,
    /// Conversation in order.
    pub messages: Vec<Message>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tether_core::Role;

    fn session() -> Session {
        Session::main(10)
    }

    fn assert_invariant(session: &Session) {
        assert_eq!(
            session.status() == SessionStatus::Processing,
            session.current_turn_id().is_some(),
            "processing iff a turn is current"
        );
    }

    #[test]
    fn turn_bookkeeping() {
        let mut s = session();
        s.turn_started(TurnId::from("t1"));
        assert_eq!(s.status(), SessionStatus::Processing);
        assert_invariant(&s);

        assert_eq!(
            s.turn_ended(Some(&TurnId::from("t0")), None),
            TurnEnd::Ignored
        );
        assert_eq!(s.status(), SessionStatus::Processing);

        assert_matches!(
            s.turn_ended(Some(&TurnId::from("t1")), None),
            TurnEnd::Ended { .. }
        );
        assert_eq!(s.status(), SessionStatus::Ready);
        assert_invariant(&s);
    }

    #[test]
    fn turn_end_without_id_matches_current() {
        let mut s = session();
        s.turn_started(TurnId::from("t1"));
        assert_matches!(s.turn_ended(None, None), TurnEnd::Ended { ref turn_id, .. } if turn_id.as_str() == "t1");
        assert!(s.current_turn_id().is_none());
    }

    #[test]
    fn turn_end_without_active_turn_is_ignored() {
        let mut s = session();
        assert_eq!(s.turn_ended(None, None), TurnEnd::Ignored);
        assert_eq!(s.status(), SessionStatus::Ready);
    }

    #[test]
    fn turn_error_sets_error_status() {
        let mut s = session();
        s.turn_started(TurnId::from("t1"));
        let _ = s.turn_ended(Some(&TurnId::from("t1")), Some("rate limited".into()));
        assert_eq!(s.status(), SessionStatus::Error);
        assert_eq!(s.last_error(), Some("rate limited"));
        assert_invariant(&s);

        s.turn_started(TurnId::from("t2"));
        assert_eq!(s.last_error(), None);
    }

    #[test]
    fn turn_end_finalizes_delta_only_entries() {
        let mut s = session();
        s.turn_started(TurnId::from("t1"));
        let _ = s.apply_store_event(StoreEvent::Delta {
            item_id: ItemId::from("m1"),
            role: Role::Assistant,
            text: "streamed".into(),
            turn_id: None,
        });
        let end = s.turn_ended(None, None);
        assert_eq!(
            end,
            TurnEnd::Ended {
                turn_id: TurnId::from("t1"),
                finalized: vec![ItemId::from("m1")],
            }
        );
        assert!(s.messages().get(&ItemId::from("m1")).unwrap().finalized);
    }

    #[test]
    fn lifecycle_status_deferred_during_turn() {
        let mut s = session();
        s.turn_started(TurnId::from("t1"));
        assert!(!s.apply_lifecycle_status(SessionStatus::Merging));
        assert_eq!(s.status(), SessionStatus::Processing);
        assert_invariant(&s);

        let _ = s.turn_ended(None, None);
        assert_eq!(s.status(), SessionStatus::Merging);
        assert_invariant(&s);
    }

    #[test]
    fn processing_status_without_turn_is_not_applied() {
        let mut s = session();
        assert!(!s.apply_lifecycle_status(SessionStatus::Processing));
        assert_eq!(s.status(), SessionStatus::Ready);
        assert_invariant(&s);
    }

    #[test]
    fn interrupt_keeps_turn_until_confirmed() {
        let mut s = session();
        assert_eq!(s.interrupt(), None);
        s.turn_started(TurnId::from("t9"));
        assert_eq!(
            s.interrupt(),
            Some(OutboundEvent::TurnInterrupt {
                turn_id: TurnId::from("t9")
            })
        );
        assert_eq!(s.current_turn_id(), Some(&TurnId::from("t9")));
    }

    #[test]
    fn reconcile_transient_discards_stale_turn() {
        let mut s = session();
        s.turn_started(TurnId::from("t1"));
        let _ = s.apply_store_event(StoreEvent::Delta {
            item_id: ItemId::from("m1"),
            role: Role::Assistant,
            text: "Hi".into(),
            turn_id: None,
        });
        let change = s.reconcile_transient(&TransientState::default());
        assert_eq!(change, StoreChange::Finalized(vec![ItemId::from("m1")]));
        assert_eq!(s.status(), SessionStatus::Ready);
        assert!(s.activity_label().is_none());
        assert_invariant(&s);
    }

    #[test]
    fn reconcile_transient_adopts_server_turn() {
        let mut s = session();
        let state = TransientState {
            status: SessionStatus::Processing,
            current_turn_id: Some(TurnId::from("t5")),
            activity_label: Some("Editing files".into()),
        };
        let _ = s.reconcile_transient(&state);
        assert_eq!(s.status(), SessionStatus::Processing);
        assert_eq!(s.activity_label(), Some("Editing files"));
        assert_invariant(&s);
    }

    #[test]
    fn reconcile_transient_processing_without_turn_is_ready() {
        let mut s = session();
        let state = TransientState {
            status: SessionStatus::Processing,
            current_turn_id: None,
            activity_label: None,
        };
        let _ = s.reconcile_transient(&state);
        assert_eq!(s.status(), SessionStatus::Ready);
        assert_invariant(&s);
    }

    #[test]
    fn logs_are_bounded() {
        let mut s = Session::main(2);
        for second in 0..5 {
            s.push_log(RpcLogEntry {
                timestamp: chrono_at(second),
                direction: tether_protocol::RpcDirection::Inbound,
                message: serde_json::json!({"n": second}),
            });
        }
        let kept: Vec<i64> = s.logs().map(|e| e.message["n"].as_i64().unwrap()).collect();
        assert_eq!(kept, vec![3, 4]);
    }

    fn chrono_at(second: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp(second, 0).unwrap()
    }

    #[test]
    fn provider_switch_is_detected() {
        let mut s = session();
        assert_eq!(s.set_model(Some("codex".into()), Some("gpt-5".into()), None), None);
        assert_eq!(
            s.set_model(Some("claude".into()), None, None),
            Some("codex".to_string())
        );
        assert_eq!(s.provider(), Some("claude"));
        assert_eq!(s.model(), Some("gpt-5"));
        assert_eq!(s.set_model(Some("claude".into()), None, None), None);
    }

    #[test]
    fn apply_info_updates_metadata() {
        let mut s = session();
        let info = WorktreeInfo {
            id: SessionId::main(),
            name: "Main".into(),
            branch_name: Some("main".into()),
            provider: Some("codex".into()),
            model: None,
            reasoning_effort: None,
            status: SessionStatus::Ready,
        };
        assert!(s.apply_info(&info));
        assert!(!s.apply_info(&info));
        assert_eq!(s.view().name, "Main");
    }

    #[test]
    fn snapshot_replaces_history_and_state() {
        let mut s = session();
        let _ = s.apply_store_event(StoreEvent::Delta {
            item_id: ItemId::from("stale"),
            role: Role::Assistant,
            text: "x".into(),
            turn_id: None,
        });
        let snapshot = SessionSnapshot {
            worktree_id: SessionId::main(),
            messages: vec![Message::finalized(ItemId::from("m1"), Role::User, "hi")],
            state: TransientState::default(),
            diff: Some("diff --git".into()),
            logs: Vec::new(),
        };
        assert_eq!(s.apply_snapshot(snapshot), StoreChange::Replaced);
        assert_eq!(s.messages().len(), 1);
        assert_eq!(s.repo_diff(), Some("diff --git"));
        assert_eq!(s.cursor(), Some(ItemId::from("m1")));
    }
}
