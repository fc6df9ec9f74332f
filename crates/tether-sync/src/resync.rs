//! Resync coordinator.
//!
//! After a reconnect, a provider switch, or an explicit request, local state
//! is repaired against the server:
//!
//! 1. Fetch the authoritative session list; create unknown sessions and
//!    close absent ones (never `main`)
//! 2. Per session, replay everything after the local cursor as an ordered
//!    sequence of completions, or apply a full snapshot when there is no
//!    cursor (or the server no longer knows it)
//! 3. Overwrite transient fields (status, current turn, activity label)
//!
//! Fetches run on a background task and come back to the client loop as
//! [`ResyncStep`]s over a channel. [`ResyncCoordinator::apply`] runs
//! synchronously inside the loop. Every run carries an epoch; steps from a
//! superseded run are discarded. While a session's replay is in flight its
//! live frames are queued by the registry and drained after the replay.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tether_core::{Disposition, ItemId, SessionId, SyncError};
use tether_protocol::{CreateWorktreeRequest, ReplayBatch, SessionSnapshot, WorktreeInfo};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::reconcile::StoreEvent;
use crate::registry::{ListDiff, RouteOutcome, SessionRegistry};

/// Request/response access to authoritative server state.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    /// Every live session.
    async fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, SyncError>;

    /// Create a session.
    async fn create_worktree(
        &self,
        request: &CreateWorktreeRequest,
    ) -> Result<WorktreeInfo, SyncError>;

    /// Complete history and state of one session.
    async fn fetch_snapshot(&self, session_id: &SessionId) -> Result<SessionSnapshot, SyncError>;

    /// Messages after `since`.
    ///
    /// Fails with [`SyncError::ReplayGap`] when the server does not know
    /// the cursor.
    async fn fetch_replay(
        &self,
        session_id: &SessionId,
        since: &ItemId,
    ) -> Result<ReplayBatch, SyncError>;
}

/// Why a resync run started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResyncReason {
    /// The connection (re)opened.
    Reconnected,
    /// A session switched agent provider.
    ProviderSwitch(SessionId),
    /// The user asked for it.
    Requested,
}

impl fmt::Display for ResyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconnected => write!(f, "reconnected"),
            Self::ProviderSwitch(id) => write!(f, "provider switch in {id}"),
            Self::Requested => write!(f, "requested"),
        }
    }
}

/// Authoritative data for one session.
#[derive(Debug)]
pub enum ResyncPayload {
    /// Messages after the cursor, applied as completions.
    Append(ReplayBatch),
    /// Full history, replacing the store.
    Replace(SessionSnapshot),
}

/// Result of a background fetch, applied in the client loop.
#[derive(Debug)]
pub enum ResyncStep {
    /// The session list arrived.
    SessionList {
        /// Run the step belongs to.
        epoch: u64,
        /// Authoritative sessions.
        worktrees: Vec<WorktreeInfo>,
    },
    /// One session's data arrived.
    Session {
        /// Run the step belongs to.
        epoch: u64,
        /// Session.
        session_id: SessionId,
        /// Data to apply.
        payload: ResyncPayload,
    },
    /// One session's fetch failed.
    SessionFailed {
        /// Run the step belongs to.
        epoch: u64,
        /// Session.
        session_id: SessionId,
        /// Failure.
        error: SyncError,
    },
    /// The run is over.
    Finished {
        /// Run the step belongs to.
        epoch: u64,
    },
}

impl ResyncStep {
    /// Run the step belongs to.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        match self {
            Self::SessionList { epoch, .. }
            | Self::Session { epoch, .. }
            | Self::SessionFailed { epoch, .. }
            | Self::Finished { epoch } => *epoch,
        }
    }
}

/// What applying a step did.
#[derive(Debug)]
pub enum ResyncOutcome {
    /// The step was stale (superseded run or closed session).
    Discarded,
    /// The session set was reconciled.
    ListApplied(ListDiff),
    /// A session was repaired.
    SessionApplied {
        /// Session.
        session_id: SessionId,
        /// Whether the session's visible state changed.
        changed: bool,
        /// Frames queued during the replay, now applied.
        drained: Vec<RouteOutcome>,
    },
    /// A session's fetch failed; it keeps its local state.
    SessionSkipped {
        /// Session.
        session_id: SessionId,
        /// Frames queued during the replay, now applied.
        drained: Vec<RouteOutcome>,
    },
    /// The run is over.
    Finished {
        /// Frames still queued, now applied.
        drained: Vec<RouteOutcome>,
    },
}

/// In-flight session fetches, tagged with the epoch of the run that owns them.
type SessionTokens = Arc<Mutex<HashMap<SessionId, (u64, CancellationToken)>>>;

/// Drives resync runs.
pub struct ResyncCoordinator {
    backend: Arc<dyn SyncBackend>,
    epoch: u64,
    run: Option<CancellationToken>,
    session_tokens: SessionTokens,
    steps: mpsc::UnboundedSender<ResyncStep>,
}

impl fmt::Debug for ResyncCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResyncCoordinator")
            .field("epoch", &self.epoch)
            .field("running", &self.run.is_some())
            .finish_non_exhaustive()
    }
}

impl ResyncCoordinator {
    /// Coordinator and the receiver its steps arrive on.
    #[must_use]
    pub fn new(backend: Arc<dyn SyncBackend>) -> (Self, mpsc::UnboundedReceiver<ResyncStep>) {
        let (steps, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            backend,
            epoch: 0,
            run: None,
            session_tokens: Arc::new(Mutex::new(HashMap::new())),
            steps,
        };
        (coordinator, rx)
    }

    /// The backend, for requests outside resync (e.g. creating sessions).
    #[must_use]
    pub fn backend(&self) -> Arc<dyn SyncBackend> {
        Arc::clone(&self.backend)
    }

    /// Current epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether a run is in flight.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Start a run, superseding any run in flight. Returns the new epoch.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(&mut self, registry: &mut SessionRegistry, reason: &ResyncReason) -> u64 {
        if let Some(previous) = self.run.take() {
            debug!(epoch = self.epoch, "superseding resync run");
            previous.cancel();
        }
        self.session_tokens.lock().clear();
        self.epoch += 1;
        let epoch = self.epoch;

        let ids: Vec<SessionId> = registry.ids().cloned().collect();
        for id in &ids {
            registry.begin_resync(id);
        }
        registry.begin_list_resync();
        info!(epoch, %reason, sessions = ids.len(), "resync started");

        let token = CancellationToken::new();
        self.run = Some(token.clone());
        let task = ResyncTask {
            backend: Arc::clone(&self.backend),
            epoch,
            cursors: registry.cursors(),
            token,
            session_tokens: Arc::clone(&self.session_tokens),
            steps: self.steps.clone(),
        };
        drop(tokio::spawn(task.run()));
        epoch
    }

    /// Abandon the run in flight and apply every queued frame.
    pub fn cancel(&mut self, registry: &mut SessionRegistry) -> Vec<RouteOutcome> {
        if let Some(run) = self.run.take() {
            debug!(epoch = self.epoch, "resync run cancelled");
            run.cancel();
        }
        self.session_tokens.lock().clear();
        registry.end_list_resync();
        registry.end_all_resyncs()
    }

    /// Cancel in-flight fetches for one session (it is being torn down).
    pub fn cancel_session(&self, session_id: &SessionId) {
        if let Some((_, token)) = self.session_tokens.lock().remove(session_id) {
            debug!(session_id = %session_id, "resync fetch cancelled");
            token.cancel();
        }
    }

    /// Apply one step to the registry.
    pub fn apply(&mut self, registry: &mut SessionRegistry, step: ResyncStep) -> ResyncOutcome {
        if self.run.is_none() || step.epoch() != self.epoch {
            debug!(step_epoch = step.epoch(), epoch = self.epoch, "stale resync step discarded");
            return ResyncOutcome::Discarded;
        }

        match step {
            ResyncStep::SessionList { worktrees, .. } => {
                let diff = registry.reconcile_list(&worktrees);
                for id in &diff.created {
                    registry.begin_resync(id);
                }
                for id in &diff.closed {
                    self.cancel_session(id);
                }
                ResyncOutcome::ListApplied(diff)
            }
            ResyncStep::Session {
                session_id,
                payload,
                ..
            } => {
                let Some(session) = registry.get_mut(&session_id) else {
                    debug!(session_id = %session_id, "resync data for closed session discarded");
                    return ResyncOutcome::Discarded;
                };
                let changed = match payload {
                    ResyncPayload::Append(batch) => {
                        let mut changed = false;
                        for message in batch.messages {
                            changed |= session
                                .apply_store_event(StoreEvent::CompleteMessage(message))
                                .is_changed();
                        }
                        changed |= session.reconcile_transient(&batch.state).is_changed();
                        changed
                    }
                    ResyncPayload::Replace(snapshot) => session.apply_snapshot(snapshot).is_changed(),
                };
                debug!(session_id = %session_id, changed, "session resynced");
                let drained = registry.end_resync(&session_id);
                ResyncOutcome::SessionApplied {
                    session_id,
                    changed,
                    drained,
                }
            }
            ResyncStep::SessionFailed {
                session_id, error, ..
            } => {
                warn!(session_id = %session_id, %error, "session resync skipped");
                let drained = registry.end_resync(&session_id);
                ResyncOutcome::SessionSkipped {
                    session_id,
                    drained,
                }
            }
            ResyncStep::Finished { epoch } => {
                self.run = None;
                self.session_tokens.lock().clear();
                registry.end_list_resync();
                info!(epoch, "resync finished");
                ResyncOutcome::Finished {
                    drained: registry.end_all_resyncs(),
                }
            }
        }
    }
}

/// Background half of one run.
struct ResyncTask {
    backend: Arc<dyn SyncBackend>,
    epoch: u64,
    cursors: HashMap<SessionId, Option<ItemId>>,
    token: CancellationToken,
    session_tokens: SessionTokens,
    steps: mpsc::UnboundedSender<ResyncStep>,
}

impl ResyncTask {
    async fn run(self) {
        let epoch = self.epoch;
        let listed = tokio::select! {
            () = self.token.cancelled() => return,
            result = self.backend.list_worktrees() => result,
        };
        let worktrees = match listed {
            Ok(worktrees) => worktrees,
            Err(error) => {
                warn!(epoch, %error, "session list fetch failed");
                let _ = self.steps.send(ResyncStep::Finished { epoch });
                return;
            }
        };

        let mut ids: Vec<SessionId> = worktrees.iter().map(|w| w.id.clone()).collect();
        if !ids.iter().any(SessionId::is_main) {
            ids.insert(0, SessionId::main());
        }
        if self
            .steps
            .send(ResyncStep::SessionList { epoch, worktrees })
            .is_err()
        {
            return;
        }

        let _ = join_all(ids.into_iter().map(|id| self.sync_session(id))).await;

        if !self.token.is_cancelled() {
            let _ = self.steps.send(ResyncStep::Finished { epoch });
        }
    }

    async fn sync_session(&self, session_id: SessionId) {
        let token = self.token.child_token();
        claim_token(&self.session_tokens, &session_id, self.epoch, &token);
        let cursor = self.cursors.get(&session_id).cloned().flatten();

        let result = tokio::select! {
            () = token.cancelled() => return,
            result = fetch_session(self.backend.as_ref(), &session_id, cursor.as_ref()) => result,
        };
        release_token(&self.session_tokens, &session_id, self.epoch);

        let step = match result {
            Ok(payload) => ResyncStep::Session {
                epoch: self.epoch,
                session_id,
                payload,
            },
            Err(error) => ResyncStep::SessionFailed {
                epoch: self.epoch,
                session_id,
                error,
            },
        };
        let _ = self.steps.send(step);
    }
}

/// Register the fetch token for `session_id` unless a newer run owns the entry.
fn claim_token(tokens: &SessionTokens, session_id: &SessionId, epoch: u64, token: &CancellationToken) {
    let mut tokens = tokens.lock();
    if tokens.get(session_id).is_some_and(|(owner, _)| *owner > epoch) {
        return;
    }
    let _ = tokens.insert(session_id.clone(), (epoch, token.clone()));
}

/// Drop the fetch token for `session_id` unless a newer run owns the entry.
fn release_token(tokens: &SessionTokens, session_id: &SessionId, epoch: u64) {
    let mut tokens = tokens.lock();
    if tokens.get(session_id).is_some_and(|(owner, _)| *owner == epoch) {
        let _ = tokens.remove(session_id);
    }
}

async fn fetch_session(
    backend: &dyn SyncBackend,
    session_id: &SessionId,
    cursor: Option<&ItemId>,
) -> Result<ResyncPayload, SyncError> {
    let Some(cursor) = cursor else {
        return Ok(ResyncPayload::Replace(backend.fetch_snapshot(session_id).await?));
    };
    match backend.fetch_replay(session_id, cursor).await {
        Ok(batch) => Ok(ResyncPayload::Append(batch)),
        Err(error) if error.disposition() == Disposition::FullReplay => {
            info!(session_id = %session_id, %cursor, "replay cursor unknown upstream, fetching full history");
            Ok(ResyncPayload::Replace(backend.fetch_snapshot(session_id).await?))
        }
        Err(error) => Err(error),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
