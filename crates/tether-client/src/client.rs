//! The sync client event loop.
//!
//! [`SyncClient`] owns the [`SessionRegistry`], the [`ResyncCoordinator`]
//! and the [`SupervisorHandle`]. One task processes supervisor events,
//! resync steps, background task results and user commands strictly in
//! arrival order, so registry mutations need no locking. Renderers
//! subscribe to [`ClientUpdate`]s; everything else goes through the
//! cloneable [`ClientHandle`].
//!
//! Resync runs start on every successful open, on a provider switch (when
//! enabled), and on request.

use std::sync::Arc;

use tether_core::{Attachment, ConnectionState, SessionId, SyncError};
use tether_protocol::{CreateWorktreeRequest, OutboundEvent, OutboundFrame, WorktreeInfo};
use tether_sync::{
    Effect, ResyncCoordinator, ResyncOutcome, ResyncReason, ResyncStep, RouteOutcome,
    SessionRegistry, SessionView, SyncBackend,
};
use tether_transport::{ChannelSupervisor, SupervisorEvent, SupervisorHandle};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::update::ClientUpdate;

type Reply<T> = oneshot::Sender<Result<T, ClientError>>;

/// Requests from [`ClientHandle`]s.
enum Command {
    Connect,
    Disconnect,
    SendUserMessage {
        session_id: SessionId,
        text: String,
        display_text: Option<String>,
        attachments: Vec<Attachment>,
        reply: Reply<()>,
    },
    Interrupt {
        session_id: SessionId,
        reply: Reply<()>,
    },
    SelectActive {
        session_id: SessionId,
        reply: Reply<()>,
    },
    RequestResync,
    SetModel {
        session_id: SessionId,
        model: String,
        reasoning_effort: Option<String>,
        reply: Reply<()>,
    },
    RequestModels {
        reply: Reply<()>,
    },
    CreateWorktree {
        request: CreateWorktreeRequest,
        reply: Reply<SessionId>,
    },
    CloseWorktree {
        session_id: SessionId,
        reply: Reply<bool>,
    },
    View {
        session_id: Option<SessionId>,
        reply: Reply<Option<SessionView>>,
    },
    Shutdown,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connect => "Connect",
            Self::Disconnect => "Disconnect",
            Self::SendUserMessage { .. } => "SendUserMessage",
            Self::Interrupt { .. } => "Interrupt",
            Self::SelectActive { .. } => "SelectActive",
            Self::RequestResync => "RequestResync",
            Self::SetModel { .. } => "SetModel",
            Self::RequestModels { .. } => "RequestModels",
            Self::CreateWorktree { .. } => "CreateWorktree",
            Self::CloseWorktree { .. } => "CloseWorktree",
            Self::View { .. } => "View",
            Self::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// Results of work the loop spawned.
enum TaskResult {
    WorktreeCreated {
        result: Result<WorktreeInfo, SyncError>,
        reply: Reply<SessionId>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable command surface of a running [`SyncClient`].
#[derive(Clone, Debug)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    updates: broadcast::Sender<ClientUpdate>,
    supervisor: SupervisorHandle,
}

impl ClientHandle {
    fn post(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Stopped)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.post(build(reply))?;
        rx.await.map_err(|_| ClientError::Stopped)?
    }

    /// Subscribe to updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientUpdate> {
        self.updates.subscribe()
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Whether the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.supervisor.is_connected()
    }

    /// Deliberately connect (also after retries were exhausted).
    pub fn connect(&self) -> Result<(), ClientError> {
        self.post(Command::Connect)
    }

    /// Close the connection without reconnecting.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.post(Command::Disconnect)
    }

    /// Stop the client loop and its connection.
    pub fn shutdown(&self) -> Result<(), ClientError> {
        self.post(Command::Shutdown)
    }

    /// Send user input to a session. The message appears in the
    /// conversation once the server echoes it.
    pub async fn send_user_message(
        &self,
        session_id: &SessionId,
        text: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send_user_message_with(session_id, text, None, Vec::new())
            .await
    }

    /// [`Self::send_user_message`] with display text and attachments.
    pub async fn send_user_message_with(
        &self,
        session_id: &SessionId,
        text: impl Into<String>,
        display_text: Option<String>,
        attachments: Vec<Attachment>,
    ) -> Result<(), ClientError> {
        let session_id = session_id.clone();
        let text = text.into();
        self.request(|reply| Command::SendUserMessage {
            session_id,
            text,
            display_text,
            attachments,
            reply,
        })
        .await
    }

    /// Ask the server to stop the session's running turn. The turn stays
    /// current until the server confirms.
    pub async fn interrupt(&self, session_id: &SessionId) -> Result<(), ClientError> {
        let session_id = session_id.clone();
        self.request(|reply| Command::Interrupt { session_id, reply })
            .await
    }

    /// Change the rendered session.
    pub async fn select_active(&self, session_id: &SessionId) -> Result<(), ClientError> {
        let session_id = session_id.clone();
        self.request(|reply| Command::SelectActive { session_id, reply })
            .await
    }

    /// Start a resync run now.
    pub fn request_resync(&self) -> Result<(), ClientError> {
        self.post(Command::RequestResync)
    }

    /// Switch a session's model.
    pub async fn set_model(
        &self,
        session_id: &SessionId,
        model: impl Into<String>,
        reasoning_effort: Option<String>,
    ) -> Result<(), ClientError> {
        let session_id = session_id.clone();
        let model = model.into();
        self.request(|reply| Command::SetModel {
            session_id,
            model,
            reasoning_effort,
            reply,
        })
        .await
    }

    /// Ask the server for the model catalogue.
    pub async fn request_models(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::RequestModels { reply }).await
    }

    /// Create a session on the server and register it locally.
    pub async fn create_worktree(
        &self,
        request: CreateWorktreeRequest,
    ) -> Result<SessionId, ClientError> {
        self.request(|reply| Command::CreateWorktree { request, reply })
            .await
    }

    /// Close a session locally, cancelling its in-flight resync requests.
    /// Returns whether a session was removed.
    pub async fn close_worktree(&self, session_id: &SessionId) -> Result<bool, ClientError> {
        let session_id = session_id.clone();
        self.request(|reply| Command::CloseWorktree { session_id, reply })
            .await
    }

    /// Snapshot of a session (the active one when `session_id` is `None`).
    pub async fn view(
        &self,
        session_id: Option<&SessionId>,
    ) -> Result<Option<SessionView>, ClientError> {
        let session_id = session_id.cloned();
        self.request(|reply| Command::View { session_id, reply })
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// The serialized event loop. See the module docs.
pub struct SyncClient {
    config: ClientConfig,
    registry: SessionRegistry,
    coordinator: ResyncCoordinator,
    supervisor: SupervisorHandle,
    supervisor_events: mpsc::Receiver<SupervisorEvent>,
    resync_steps: mpsc::UnboundedReceiver<ResyncStep>,
    commands: mpsc::UnboundedReceiver<Command>,
    tasks_tx: mpsc::UnboundedSender<TaskResult>,
    tasks: mpsc::UnboundedReceiver<TaskResult>,
    updates: broadcast::Sender<ClientUpdate>,
    pending_default: Option<SessionId>,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("sessions", &self.registry.len())
            .field("active", self.registry.active())
            .field("resync_epoch", &self.coordinator.epoch())
            .finish_non_exhaustive()
    }
}

impl SyncClient {
    /// Build a client and its handle. Nothing runs until [`Self::run`].
    ///
    /// Must be called inside a tokio runtime (the supervisor task starts
    /// idle).
    #[must_use]
    pub fn new(config: ClientConfig, backend: Arc<dyn SyncBackend>) -> (Self, ClientHandle) {
        let (supervisor, supervisor_events) = ChannelSupervisor::spawn(config.supervisor.clone());
        let (coordinator, resync_steps) = ResyncCoordinator::new(backend);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (tasks_tx, tasks) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(config.update_buffer.max(1));
        let pending_default =
            (!config.default_session.is_main()).then(|| config.default_session.clone());

        let handle = ClientHandle {
            commands: commands_tx,
            updates: updates.clone(),
            supervisor: supervisor.clone(),
        };
        let client = Self {
            registry: SessionRegistry::new(config.registry),
            config,
            coordinator,
            supervisor,
            supervisor_events,
            resync_steps,
            commands,
            tasks_tx,
            tasks,
            updates,
            pending_default,
        };
        (client, handle)
    }

    /// Build a client and run it on a new task.
    #[must_use]
    pub fn spawn(
        config: ClientConfig,
        backend: Arc<dyn SyncBackend>,
    ) -> (ClientHandle, JoinHandle<()>) {
        let (client, handle) = Self::new(config, backend);
        (handle, tokio::spawn(client.run()))
    }

    /// Run until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!(url = %self.config.supervisor.url, "sync client started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(event) = self.supervisor_events.recv() => self.on_supervisor_event(event),
                Some(step) = self.resync_steps.recv() => self.on_resync_step(step),
                Some(result) = self.tasks.recv() => self.on_task_result(result),
            }
        }
        let _ = self.coordinator.cancel(&mut self.registry);
        let _ = self.supervisor.shutdown();
        info!("sync client stopped");
    }

    fn publish(&self, update: ClientUpdate) {
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }

    fn publish_session(&self, session_id: &SessionId) {
        if let Some(view) = self.registry.view(session_id) {
            self.publish(ClientUpdate::Session(Arc::new(view)));
        }
    }

    /// Closing the active session falls back to main.
    fn publish_if_active_changed(&self, before: &SessionId) {
        let active = self.registry.active();
        if active != before {
            self.publish(ClientUpdate::ActiveChanged(active.clone()));
        }
    }

    fn start_resync(&mut self, reason: &ResyncReason) {
        let epoch = self.coordinator.start(&mut self.registry, reason);
        self.publish(ClientUpdate::ResyncStarted { epoch });
    }

    // ── Supervisor ──────────────────────────────────────────────────

    fn on_supervisor_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Opened { generation } => {
                debug!(generation, "connection open, resyncing");
                self.publish(ClientUpdate::Connection(ConnectionState::Open));
                self.start_resync(&ResyncReason::Reconnected);
            }
            SupervisorEvent::Inbound(frame) => {
                let active = self.registry.active().clone();
                let outcome = self.registry.route(frame);
                self.on_route_outcome(outcome);
                self.publish_if_active_changed(&active);
            }
            SupervisorEvent::Closed { generation, reason } => {
                debug!(generation, %reason, "connection closed");
                self.publish(ClientUpdate::Connection(self.supervisor.state()));
            }
            SupervisorEvent::RetriesExhausted { attempts } => {
                warn!(attempts, "giving up on reconnecting");
                self.publish(ClientUpdate::Connection(ConnectionState::Closed));
                self.publish(ClientUpdate::RetriesExhausted { attempts });
            }
        }
    }

    fn on_route_outcome(&mut self, outcome: RouteOutcome) {
        match outcome {
            RouteOutcome::Applied { session_id, effect } => self.on_effect(&session_id, effect),
            RouteOutcome::Buffered(_)
            | RouteOutcome::Duplicate { .. }
            | RouteOutcome::Stale(_)
            | RouteOutcome::Ignored => {}
        }
    }

    fn on_effect(&mut self, session_id: &SessionId, effect: Effect) {
        match effect {
            Effect::Created => {
                self.publish(ClientUpdate::SessionCreated(session_id.clone()));
                self.publish_session(session_id);
                self.adopt_default_session();
            }
            Effect::Removed => {
                self.coordinator.cancel_session(session_id);
                self.publish(ClientUpdate::SessionClosed(session_id.clone()));
            }
            Effect::Models => {
                self.publish(ClientUpdate::Models(self.registry.models().to_vec()));
            }
            Effect::TurnFailed(error) => {
                self.publish_session(session_id);
                if !error.is_user_visible() {
                    return;
                }
                let message = match error {
                    SyncError::TurnFailure { message, .. } => message,
                    other => other.to_string(),
                };
                self.publish(ClientUpdate::TurnFailed {
                    session_id: session_id.clone(),
                    message,
                });
            }
            Effect::SessionError(message) => {
                self.publish_session(session_id);
                self.publish(ClientUpdate::SessionError {
                    session_id: session_id.clone(),
                    message,
                });
            }
            Effect::Metadata {
                provider_switched_from: Some(previous),
            } => {
                self.publish_session(session_id);
                if self.config.resync_on_provider_switch {
                    info!(session_id = %session_id, from = %previous, "provider switched, resyncing");
                    self.start_resync(&ResyncReason::ProviderSwitch(session_id.clone()));
                }
            }
            effect if effect.is_visible() => self.publish_session(session_id),
            _ => {}
        }
    }

    // ── Resync ──────────────────────────────────────────────────────

    fn on_resync_step(&mut self, step: ResyncStep) {
        let active = self.registry.active().clone();
        let epoch = step.epoch();
        match self.coordinator.apply(&mut self.registry, step) {
            ResyncOutcome::Discarded => {}
            ResyncOutcome::ListApplied(diff) => {
                for id in &diff.closed {
                    self.publish(ClientUpdate::SessionClosed(id.clone()));
                }
                for id in &diff.created {
                    self.publish(ClientUpdate::SessionCreated(id.clone()));
                }
                self.adopt_default_session();
            }
            ResyncOutcome::SessionApplied {
                session_id,
                changed,
                drained,
            } => {
                if changed {
                    self.publish_session(&session_id);
                }
                self.on_drained(drained);
            }
            ResyncOutcome::SessionSkipped { drained, .. } => self.on_drained(drained),
            ResyncOutcome::Finished { drained } => {
                self.on_drained(drained);
                self.publish(ClientUpdate::ResyncFinished { epoch });
            }
        }
        self.publish_if_active_changed(&active);
    }

    fn on_drained(&mut self, drained: Vec<RouteOutcome>) {
        for outcome in drained {
            self.on_route_outcome(outcome);
        }
    }

    /// Select the configured default session once it exists.
    fn adopt_default_session(&mut self) {
        let Some(preferred) = self.pending_default.take() else {
            return;
        };
        if self.registry.select_active(&preferred).is_err() {
            self.pending_default = Some(preferred);
        }
    }

    // ── Commands ────────────────────────────────────────────────────

    fn send_to(&self, session_id: &SessionId, event: OutboundEvent) -> Result<(), ClientError> {
        if !self.registry.contains(session_id) {
            return Err(SyncError::StaleSessionReference {
                session_id: session_id.clone(),
            }
            .into());
        }
        let frame = OutboundFrame::new(session_id, event);
        if self.supervisor.send(&frame) {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    fn on_command(&mut self, command: Command) {
        debug!(?command, "client command");
        match command {
            Command::Connect => {
                let _ = self.supervisor.connect();
            }
            Command::Disconnect => {
                let _ = self.supervisor.disconnect();
            }
            Command::SendUserMessage {
                session_id,
                text,
                display_text,
                attachments,
                reply,
            } => {
                let event = OutboundEvent::UserMessage {
                    text,
                    display_text,
                    attachments,
                };
                let _ = reply.send(self.send_to(&session_id, event));
            }
            Command::Interrupt { session_id, reply } => {
                let result = match self.registry.interrupt(&session_id) {
                    Some(frame) if self.supervisor.send(&frame) => Ok(()),
                    Some(_) => Err(ClientError::NotConnected),
                    None if self.registry.contains(&session_id) => {
                        Err(ClientError::NoActiveTurn(session_id))
                    }
                    None => Err(SyncError::StaleSessionReference { session_id }.into()),
                };
                let _ = reply.send(result);
            }
            Command::SelectActive { session_id, reply } => {
                let result = self.registry.select_active(&session_id).map_err(ClientError::from);
                if result.is_ok() {
                    self.pending_default = None;
                    self.publish(ClientUpdate::ActiveChanged(session_id.clone()));
                    self.publish_session(&session_id);
                }
                let _ = reply.send(result);
            }
            Command::RequestResync => self.start_resync(&ResyncReason::Requested),
            Command::SetModel {
                session_id,
                model,
                reasoning_effort,
                reply,
            } => {
                let event = OutboundEvent::ModelSet {
                    model,
                    reasoning_effort,
                };
                let _ = reply.send(self.send_to(&session_id, event));
            }
            Command::RequestModels { reply } => {
                let frame = OutboundFrame::unscoped(OutboundEvent::ModelList);
                let result = if self.supervisor.send(&frame) {
                    Ok(())
                } else {
                    Err(ClientError::NotConnected)
                };
                let _ = reply.send(result);
            }
            Command::CreateWorktree { request, reply } => {
                let backend = self.coordinator.backend();
                let tasks = self.tasks_tx.clone();
                drop(tokio::spawn(async move {
                    let result = backend.create_worktree(&request).await;
                    let _ = tasks.send(TaskResult::WorktreeCreated { result, reply });
                }));
            }
            Command::CloseWorktree { session_id, reply } => {
                let result = if session_id.is_main() {
                    Err(ClientError::MainSession)
                } else {
                    let active = self.registry.active().clone();
                    self.coordinator.cancel_session(&session_id);
                    let closed = self.registry.close(&session_id);
                    if closed {
                        self.publish(ClientUpdate::SessionClosed(session_id));
                        self.publish_if_active_changed(&active);
                    }
                    Ok(closed)
                };
                let _ = reply.send(result);
            }
            Command::View { session_id, reply } => {
                let id = session_id.unwrap_or_else(|| self.registry.active().clone());
                let _ = reply.send(Ok(self.registry.view(&id)));
            }
            // Handled by the loop.
            Command::Shutdown => {}
        }
    }

    fn on_task_result(&mut self, result: TaskResult) {
        match result {
            TaskResult::WorktreeCreated { result, reply } => {
                let outcome = result.map_err(ClientError::from).map(|info| {
                    if self.registry.upsert(&info) {
                        self.publish(ClientUpdate::SessionCreated(info.id.clone()));
                    }
                    self.publish_session(&info.id);
                    info.id
                });
                if let Err(error) = &outcome {
                    warn!(%error, "session creation failed");
                }
                let _ = reply.send(outcome);
            }
        }
    }
}
