//! Session registry.
//!
//! The [`SessionRegistry`] owns every [`Session`] and is the only mutator of
//! their message stores. [`SessionRegistry::route`] scopes each inbound frame
//! to its session and applies it:
//!
//! 1. Registry-scoped frames (`worktree_*`, `model_list`) update the session set
//! 2. Frames for unknown or closed sessions are dropped as stale
//! 3. Duplicate `seq` numbers are dropped
//! 4. Frames for a session under resync are queued until its replay lands
//! 5. Everything else is applied to the session
//!
//! The `main` session always exists.

use std::collections::{HashMap, HashSet, VecDeque};

use tether_core::{ItemId, SessionId, SyncError, TurnId};
use tether_protocol::{InboundEvent, InboundFrame, ModelInfo, OutboundFrame, WorktreeInfo};
use tracing::{debug, info, warn};

use crate::reconcile::{COMMAND_ITEM_TYPE, StoreEvent};
use crate::session::{Session, SessionView, TurnEnd};
use crate::store::StoreChange;

/// Registry tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Sequence numbers remembered per session.
    pub dedupe_window: usize,
    /// RPC log lines kept per session.
    pub rpc_log_limit: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dedupe_window: 1024,
            rpc_log_limit: 500,
        }
    }
}

/// What applying one event did to its session.
#[derive(Debug)]
pub enum Effect {
    /// The conversation changed (or not).
    Message(StoreChange),
    /// A turn began.
    TurnStarted(TurnId),
    /// A turn ended normally.
    TurnEnded {
        /// The turn that ended.
        turn_id: TurnId,
    },
    /// A turn failed; surfaced to the user.
    TurnFailed(SyncError),
    /// A turn event referenced a stale turn.
    TurnIgnored,
    /// Status or activity label changed.
    Status,
    /// Provider/model metadata changed.
    Metadata {
        /// Previous provider when the provider switched.
        provider_switched_from: Option<String>,
    },
    /// The session was created.
    Created,
    /// The session was closed.
    Removed,
    /// The model catalogue changed.
    Models,
    /// An RPC log line was appended.
    Log,
    /// The repository diff changed.
    Diff,
    /// A session-scoped error arrived.
    SessionError(String),
    /// Nothing visible changed.
    Unchanged,
}

impl Effect {
    /// Whether renderers need a fresh view of the session.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        match self {
            Self::Message(change) => change.is_changed(),
            Self::TurnIgnored | Self::Unchanged => false,
            _ => true,
        }
    }
}

/// Result of routing one frame.
#[derive(Debug)]
pub enum RouteOutcome {
    /// The frame was applied.
    Applied {
        /// Session the frame was scoped to.
        session_id: SessionId,
        /// What changed.
        effect: Effect,
    },
    /// Queued until the session's replay lands.
    Buffered(SessionId),
    /// Already delivered.
    Duplicate {
        /// Session.
        session_id: SessionId,
        /// Repeated sequence number.
        seq: u64,
    },
    /// The session is unknown or closed.
    Stale(SyncError),
    /// Nothing to do (heartbeat acks, unknown frame types).
    Ignored,
}

/// Sessions created and closed by a session list reconciliation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListDiff {
    /// Sessions created locally.
    pub created: Vec<SessionId>,
    /// Sessions closed locally.
    pub closed: Vec<SessionId>,
}

/// Session-set changes made by live frames while a list fetch is pending.
#[derive(Debug, Default)]
struct LiveSetChanges {
    announced: HashSet<SessionId>,
    removed: HashSet<SessionId>,
}

/// Bounded set of recently seen sequence numbers.
#[derive(Debug)]
struct SeqWindow {
    limit: usize,
    seen: HashSet<u64>,
    order: VecDeque<u64>,
}

impl SeqWindow {
    fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    fn should_process(&mut self, seq: Option<u64>) -> bool {
        let Some(seq) = seq else {
            return true;
        };
        if !self.seen.insert(seq) {
            return false;
        }
        self.order.push_back(seq);
        while self.order.len() > self.limit {
            if let Some(dropped) = self.order.pop_front() {
                let _ = self.seen.remove(&dropped);
            }
        }
        true
    }
}

/// Owner of every session.
#[derive(Debug)]
pub struct SessionRegistry {
    config: RegistryConfig,
    sessions: HashMap<SessionId, Session>,
    order: Vec<SessionId>,
    closed: HashSet<SessionId>,
    active: SessionId,
    dedupe: HashMap<SessionId, SeqWindow>,
    resyncing: HashMap<SessionId, VecDeque<InboundFrame>>,
    live_changes: Option<LiveSetChanges>,
    models: Vec<ModelInfo>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl SessionRegistry {
    /// Registry holding only `main`, which is active.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        let main = Session::main(config.rpc_log_limit);
        let main_id = main.id().clone();
        let mut sessions = HashMap::new();
        let _ = sessions.insert(main_id.clone(), main);
        Self {
            config,
            sessions,
            order: vec![main_id.clone()],
            closed: HashSet::new(),
            active: main_id,
            dedupe: HashMap::new(),
            resyncing: HashMap::new(),
            live_changes: None,
            models: Vec::new(),
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Session by ID.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// Whether `id` is a live session.
    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Live session IDs in creation order.
    pub fn ids(&self) -> impl Iterator<Item = &SessionId> + '_ {
        self.order.iter()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Always false: `main` exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Session currently rendered.
    #[must_use]
    pub fn active(&self) -> &SessionId {
        &self.active
    }

    /// Model catalogue.
    #[must_use]
    pub fn models(&self) -> &[ModelInfo] {
        &self.models
    }

    /// Read-only view of one session.
    #[must_use]
    pub fn view(&self, id: &SessionId) -> Option<SessionView> {
        self.sessions.get(id).map(Session::view)
    }

    /// Replay cursors of every live session.
    #[must_use]
    pub fn cursors(&self) -> HashMap<SessionId, Option<ItemId>> {
        self.sessions
            .iter()
            .map(|(id, session)| (id.clone(), session.cursor()))
            .collect()
    }

    // ── Session set ─────────────────────────────────────────────────

    /// Change which session is rendered. Background sessions keep
    /// reconciling.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StaleSessionReference`] for unknown sessions.
    pub fn select_active(&mut self, id: &SessionId) -> Result<(), SyncError> {
        if !self.sessions.contains_key(id) {
            return Err(SyncError::StaleSessionReference {
                session_id: id.clone(),
            });
        }
        debug!(session_id = %id, "active session selected");
        self.active = id.clone();
        Ok(())
    }

    /// Create or update a session from server metadata. Returns `true`
    /// when the session was created.
    pub fn upsert(&mut self, info: &WorktreeInfo) -> bool {
        if let Some(changes) = &mut self.live_changes {
            let _ = changes.removed.remove(&info.id);
            let _ = changes.announced.insert(info.id.clone());
        }
        self.insert_or_update(info)
    }

    fn insert_or_update(&mut self, info: &WorktreeInfo) -> bool {
        if let Some(session) = self.sessions.get_mut(&info.id) {
            let _ = session.apply_info(info);
            return false;
        }
        let _ = self.closed.remove(&info.id);
        info!(session_id = %info.id, name = %info.name, "session created");
        let _ = self
            .sessions
            .insert(info.id.clone(), Session::new(info, self.config.rpc_log_limit));
        self.order.push(info.id.clone());
        true
    }

    /// Close a session. `main` cannot be closed. Returns whether a session
    /// was removed.
    pub fn close(&mut self, id: &SessionId) -> bool {
        if id.is_main() {
            warn!("refusing to close the main session");
            return false;
        }
        if let Some(changes) = &mut self.live_changes {
            let _ = changes.announced.remove(id);
            let _ = changes.removed.insert(id.clone());
        }
        self.remove_session(id)
    }

    fn remove_session(&mut self, id: &SessionId) -> bool {
        if self.sessions.remove(id).is_none() {
            return false;
        }
        info!(session_id = %id, "session closed");
        self.order.retain(|known| known != id);
        let _ = self.dedupe.remove(id);
        let _ = self.resyncing.remove(id);
        let _ = self.closed.insert(id.clone());
        if self.active == *id {
            self.active = SessionId::main();
        }
        true
    }

    /// Start recording sessions created or closed outside
    /// [`reconcile_list`](Self::reconcile_list). The list about to arrive
    /// predates them, so it does not override them.
    pub fn begin_list_resync(&mut self) {
        self.live_changes = Some(LiveSetChanges::default());
    }

    /// Stop recording without a list (the fetch failed or was abandoned).
    pub fn end_list_resync(&mut self) {
        self.live_changes = None;
    }

    /// Reconcile the session set against the authoritative list.
    ///
    /// Unknown sessions are created; known sessions absent from the list
    /// are closed (never `main`). Sessions announced or closed by live
    /// frames since [`begin_list_resync`](Self::begin_list_resync) keep
    /// their live state.
    pub fn reconcile_list(&mut self, worktrees: &[WorktreeInfo]) -> ListDiff {
        let changes = self.live_changes.take().unwrap_or_default();
        let mut diff = ListDiff::default();
        for info in worktrees {
            if changes.removed.contains(&info.id) {
                debug!(session_id = %info.id, "listed session was closed meanwhile, not recreating");
                continue;
            }
            if self.insert_or_update(info) {
                diff.created.push(info.id.clone());
            }
        }
        let listed: HashSet<&SessionId> = worktrees.iter().map(|w| &w.id).collect();
        let absent: Vec<SessionId> = self
            .order
            .iter()
            .filter(|id| !id.is_main() && !listed.contains(id))
            .filter(|id| !changes.announced.contains(*id))
            .cloned()
            .collect();
        for id in absent {
            if self.remove_session(&id) {
                diff.closed.push(id);
            }
        }
        diff
    }

    /// Interrupt request for the session's running turn.
    #[must_use]
    pub fn interrupt(&self, id: &SessionId) -> Option<OutboundFrame> {
        let event = self.sessions.get(id)?.interrupt()?;
        Some(OutboundFrame::new(id, event))
    }

    // ── Resync buffering ────────────────────────────────────────────

    /// Start queueing live frames for `id`. Idempotent.
    pub fn begin_resync(&mut self, id: &SessionId) {
        if self.sessions.contains_key(id) {
            let _ = self.resyncing.entry(id.clone()).or_default();
        }
    }

    /// Whether frames for `id` are being queued.
    #[must_use]
    pub fn is_resyncing(&self, id: &SessionId) -> bool {
        self.resyncing.contains_key(id)
    }

    /// Stop queueing for `id` and apply the queued frames in order.
    pub fn end_resync(&mut self, id: &SessionId) -> Vec<RouteOutcome> {
        let Some(queued) = self.resyncing.remove(id) else {
            return Vec::new();
        };
        if !queued.is_empty() {
            debug!(session_id = %id, count = queued.len(), "draining frames buffered during resync");
        }
        queued
            .into_iter()
            .map(|frame| self.apply_to_session(frame.session_id, frame.event))
            .collect()
    }

    /// Stop queueing everywhere and apply every queue.
    pub fn end_all_resyncs(&mut self) -> Vec<RouteOutcome> {
        let ids: Vec<SessionId> = self.resyncing.keys().cloned().collect();
        ids.iter().flat_map(|id| self.end_resync(id)).collect()
    }

    // ── Routing ─────────────────────────────────────────────────────

    /// Scope one inbound frame to its session and apply it.
    pub fn route(&mut self, frame: InboundFrame) -> RouteOutcome {
        let InboundFrame {
            session_id,
            seq,
            event,
        } = frame;

        if matches!(event, InboundEvent::Pong | InboundEvent::Unknown) {
            return RouteOutcome::Ignored;
        }
        if event.is_registry_scoped() {
            return self.apply_registry_event(session_id, event);
        }
        if !self.sessions.contains_key(&session_id) {
            let reason = if self.closed.contains(&session_id) {
                "closed"
            } else {
                "unknown"
            };
            debug!(session_id = %session_id, kind = event.kind(), reason, "frame for stale session dropped");
            return RouteOutcome::Stale(SyncError::StaleSessionReference { session_id });
        }

        let config = self.config;
        let window = self
            .dedupe
            .entry(session_id.clone())
            .or_insert_with(|| SeqWindow::new(config.dedupe_window));
        if !window.should_process(seq) {
            let seq = seq.unwrap_or_default();
            debug!(session_id = %session_id, seq, "duplicate frame dropped");
            return RouteOutcome::Duplicate { session_id, seq };
        }

        if let Some(queue) = self.resyncing.get_mut(&session_id) {
            queue.push_back(InboundFrame {
                session_id: session_id.clone(),
                seq,
                event,
            });
            return RouteOutcome::Buffered(session_id);
        }

        self.apply_to_session(session_id, event)
    }

    fn apply_registry_event(&mut self, session_id: SessionId, event: InboundEvent) -> RouteOutcome {
        match event {
            InboundEvent::WorktreeCreated { worktree } => {
                let created = self.upsert(&worktree);
                RouteOutcome::Applied {
                    session_id: worktree.id,
                    effect: if created {
                        Effect::Created
                    } else {
                        Effect::Metadata {
                            provider_switched_from: None,
                        }
                    },
                }
            }
            InboundEvent::WorktreeUpdated { worktree } => {
                let Some(session) = self.sessions.get_mut(&worktree.id) else {
                    return RouteOutcome::Stale(SyncError::StaleSessionReference {
                        session_id: worktree.id,
                    });
                };
                let changed = session.apply_info(&worktree);
                RouteOutcome::Applied {
                    session_id: worktree.id,
                    effect: if changed {
                        Effect::Metadata {
                            provider_switched_from: None,
                        }
                    } else {
                        Effect::Unchanged
                    },
                }
            }
            InboundEvent::WorktreeRemoved { worktree_id } => {
                if self.close(&worktree_id) {
                    RouteOutcome::Applied {
                        session_id: worktree_id,
                        effect: Effect::Removed,
                    }
                } else {
                    RouteOutcome::Stale(SyncError::StaleSessionReference {
                        session_id: worktree_id,
                    })
                }
            }
            InboundEvent::ModelList { models } => {
                self.models = models;
                RouteOutcome::Applied {
                    session_id,
                    effect: Effect::Models,
                }
            }
            _ => RouteOutcome::Ignored,
        }
    }

    fn apply_to_session(&mut self, session_id: SessionId, event: InboundEvent) -> RouteOutcome {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return RouteOutcome::Stale(SyncError::StaleSessionReference { session_id });
        };
        let effect = apply_session_event(session, event);
        RouteOutcome::Applied { session_id, effect }
    }
}

fn apply_session_event(session: &mut Session, event: InboundEvent) -> Effect {
    match event {
        InboundEvent::Status { message, status } => {
            let mut changed = session.set_activity(message);
            if let Some(status) = status {
                changed |= session.apply_lifecycle_status(status);
            }
            if changed { Effect::Status } else { Effect::Unchanged }
        }
        InboundEvent::Ready { provider, model } => Effect::Metadata {
            provider_switched_from: session.set_model(provider, model, None),
        },
        InboundEvent::ModelSet {
            model,
            reasoning_effort,
            provider,
        } => Effect::Metadata {
            provider_switched_from: session.set_model(provider, Some(model), reasoning_effort),
        },
        InboundEvent::TurnStarted { turn_id } => {
            session.turn_started(turn_id.clone());
            Effect::TurnStarted(turn_id)
        }
        InboundEvent::TurnCompleted { turn_id } => match session.turn_ended(turn_id.as_ref(), None) {
            TurnEnd::Ended { turn_id, .. } => Effect::TurnEnded { turn_id },
            TurnEnd::Ignored => Effect::TurnIgnored,
        },
        InboundEvent::TurnError { turn_id, message } => {
            match session.turn_ended(turn_id.as_ref(), Some(message.clone())) {
                TurnEnd::Ended { turn_id, .. } => Effect::TurnFailed(SyncError::TurnFailure {
                    session_id: session.id().clone(),
                    turn_id: Some(turn_id),
                    message,
                }),
                TurnEnd::Ignored => Effect::TurnIgnored,
            }
        }
        InboundEvent::Error { message } => {
            warn!(session_id = %session.id(), %message, "session error");
            session.set_error(message.clone());
            Effect::SessionError(message)
        }
        InboundEvent::RepoDiff { diff } => {
            if session.set_diff(diff) { Effect::Diff } else { Effect::Unchanged }
        }
        InboundEvent::RpcLog { entry } => {
            session.push_log(entry);
            Effect::Log
        }
        InboundEvent::ItemStarted {
            item_id,
            item_type,
            command,
        } => {
            let label = command.clone().unwrap_or_else(|| item_type.clone());
            let _ = session.set_activity(Some(label));
            if item_type != COMMAND_ITEM_TYPE {
                return Effect::Status;
            }
            let turn_id = session.current_turn_id().cloned();
            Effect::Message(session.apply_store_event(StoreEvent::CommandStarted {
                item_id,
                command,
                turn_id,
            }))
        }
        other => match StoreEvent::from_inbound(other) {
            Some(store_event) => Effect::Message(session.apply_store_event(store_event)),
            None => Effect::Unchanged,
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
