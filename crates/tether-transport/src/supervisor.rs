//! Channel supervisor: the one WebSocket connection of a client.
//!
//! [`ChannelSupervisor::spawn`] starts an actor task and returns a cloneable
//! [`SupervisorHandle`] plus the stream of [`SupervisorEvent`]s. The actor
//! owns the connection lifecycle:
//!
//! - **Connect**: one connection task per attempt, bounded by the connect
//!   timeout. Every attempt gets a fresh generation; events from any other
//!   generation are ignored, so at most one connection is ever honored.
//! - **Heartbeat**: a JSON ping every interval, dead after the pong grace
//!   window (see [`crate::heartbeat`]).
//! - **Reconnect**: unintentional closes schedule a cancellable timer with
//!   exponential backoff and jitter. The attempt counter resets on open;
//!   past the ceiling the supervisor reports
//!   [`SupervisorEvent::RetriesExhausted`] and stays closed until the next
//!   deliberate connect.
//! - **Disconnect**: sets the intentional-close flag, which suppresses
//!   reconnection until the next deliberate connect.
//!
//! Malformed inbound frames are logged and dropped; the connection stays up.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tether_core::{ConnectionId, ConnectionState, ReconnectPolicy};
use tether_protocol::{InboundEvent, InboundFrame, OutboundFrame, parse_frame};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::TransportError;
use crate::heartbeat::{Heartbeat, HeartbeatAction};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the supervisor → client event channel.
const EVENT_QUEUE: usize = 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Connection parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// WebSocket endpoint.
    pub url: String,
    /// Interval between pings.
    pub heartbeat_interval: Duration,
    /// How long an outstanding ping may go unanswered.
    pub pong_grace: Duration,
    /// Upper bound on one connect attempt.
    pub connect_timeout: Duration,
    /// Capacity of the outbound frame queue.
    pub outbound_queue: usize,
    /// Reconnect backoff.
    pub reconnect: ReconnectPolicy,
}

impl SupervisorConfig {
    /// Defaults for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat_interval: Duration::from_secs(25),
            pong_grace: Duration::from_secs(8),
            connect_timeout: Duration::from_secs(10),
            outbound_queue: 256,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Why a connection ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// `disconnect` or shutdown.
    Requested,
    /// The server closed the socket.
    ServerClosed,
    /// No pong within the grace window.
    HeartbeatTimeout,
    /// Connect or I/O failure.
    Failed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::ServerClosed => write!(f, "closed by server"),
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            Self::Failed(reason) => write!(f, "{reason}"),
        }
    }
}

/// What the supervisor reports to its owner.
#[derive(Clone, Debug)]
pub enum SupervisorEvent {
    /// A connection opened.
    Opened {
        /// Its generation.
        generation: u64,
    },
    /// A decoded frame from the live connection.
    Inbound(InboundFrame),
    /// The live connection (or attempt) ended.
    Closed {
        /// Its generation.
        generation: u64,
        /// Why.
        reason: CloseReason,
    },
    /// Reconnection gave up.
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
    },
}

enum Command {
    Connect,
    Disconnect,
    Shutdown,
}

/// Messages from connection and timer tasks to the actor.
enum Internal {
    Opened { generation: u64 },
    Frame { generation: u64, frame: InboundFrame },
    Closed { generation: u64, reason: CloseReason },
    ReconnectDue { generation: u64 },
}

impl Internal {
    fn generation(&self) -> u64 {
        match self {
            Self::Opened { generation }
            | Self::Frame { generation, .. }
            | Self::Closed { generation, .. }
            | Self::ReconnectDue { generation } => *generation,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

/// State shared between the actor, its connection tasks and handles.
struct Shared {
    generation: AtomicU64,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    last_pong: Mutex<Option<Instant>>,
    dropped: AtomicU64,
    state: watch::Sender<ConnectionState>,
}

/// Cloneable control surface of a [`ChannelSupervisor`].
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl fmt::Debug for SupervisorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorHandle")
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl SupervisorHandle {
    /// Deliberately connect. Clears the intentional-close flag and the
    /// attempt counter. Returns `false` if the supervisor has stopped.
    pub fn connect(&self) -> bool {
        self.commands.send(Command::Connect).is_ok()
    }

    /// Close without reconnecting.
    pub fn disconnect(&self) -> bool {
        self.commands.send(Command::Disconnect).is_ok()
    }

    /// Close and stop the supervisor.
    pub fn shutdown(&self) -> bool {
        self.commands.send(Command::Shutdown).is_ok()
    }

    /// Queue a frame on the live connection.
    ///
    /// Returns `false` without sending when the connection is not open or
    /// the outbound queue is full.
    pub fn send(&self, frame: &OutboundFrame) -> bool {
        if !self.is_connected() {
            return false;
        }
        let text = match frame.to_text() {
            Ok(text) => text,
            Err(error) => {
                warn!(%error, "outbound frame not serializable");
                return false;
            }
        };
        let outbound = self.shared.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return false;
        };
        if tx.try_send(text).is_ok() {
            true
        } else {
            let _ = self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("outbound queue full or closed, frame dropped");
            false
        }
    }

    /// Whether the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().is_open()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Generation of the newest connection attempt (0 before the first).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Time since the last heartbeat acknowledgment (or open).
    #[must_use]
    pub fn last_pong_elapsed(&self) -> Option<Duration> {
        self.shared.last_pong.lock().map(|at| at.elapsed())
    }

    /// Frames dropped because the outbound queue was full.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────────────────────────

/// Owner of the connection lifecycle. Runs as a task; see the module docs.
pub struct ChannelSupervisor {
    config: SupervisorConfig,
    shared: Arc<Shared>,
    events: mpsc::Sender<SupervisorEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    attempt: u32,
    intentional_close: bool,
    connection: Option<CancellationToken>,
    pending_outbound: Option<mpsc::Sender<String>>,
    reconnect_timer: Option<CancellationToken>,
}

impl ChannelSupervisor {
    /// Start a supervisor task. It stays idle until [`SupervisorHandle::connect`].
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(config: SupervisorConfig) -> (SupervisorHandle, mpsc::Receiver<SupervisorEvent>) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Closed);
        let shared = Arc::new(Shared {
            generation: AtomicU64::new(0),
            outbound: Mutex::new(None),
            last_pong: Mutex::new(None),
            dropped: AtomicU64::new(0),
            state,
        });
        let supervisor = Self {
            config,
            shared: Arc::clone(&shared),
            events,
            commands,
            internal_tx,
            internal_rx,
            attempt: 0,
            intentional_close: false,
            connection: None,
            pending_outbound: None,
            reconnect_timer: None,
        };
        drop(tokio::spawn(supervisor.run()));
        (
            SupervisorHandle {
                commands: commands_tx,
                shared,
            },
            events_rx,
        )
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => self.connect(),
                    Some(Command::Disconnect) => self.disconnect(),
                    Some(Command::Shutdown) | None => break,
                },
                Some(message) = self.internal_rx.recv() => {
                    if !self.handle_internal(message).await {
                        debug!("event receiver dropped");
                        break;
                    }
                }
            }
        }
        self.teardown();
        debug!("channel supervisor stopped");
    }

    fn current_generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.shared.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "connection state changed");
        }
    }

    async fn emit(&self, event: SupervisorEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    // ── Commands ────────────────────────────────────────────────────

    fn connect(&mut self) {
        if self.connection.is_some() && !self.intentional_close {
            debug!(generation = self.current_generation(), "connect ignored, connection already live");
            return;
        }
        self.intentional_close = false;
        self.attempt = 0;
        self.start_attempt();
    }

    fn disconnect(&mut self) {
        self.intentional_close = true;
        self.cancel_reconnect_timer();
        if let Some(connection) = &self.connection {
            info!(generation = self.current_generation(), "disconnecting");
            self.set_state(ConnectionState::Closing);
            connection.cancel();
        } else {
            self.set_state(ConnectionState::Closed);
        }
    }

    fn teardown(&mut self) {
        self.intentional_close = true;
        self.cancel_reconnect_timer();
        if let Some(connection) = self.connection.take() {
            connection.cancel();
        }
        self.pending_outbound = None;
        *self.shared.outbound.lock() = None;
        self.set_state(ConnectionState::Closed);
    }

    fn start_attempt(&mut self) {
        self.cancel_reconnect_timer();
        if let Some(previous) = self.connection.take() {
            previous.cancel();
        }
        *self.shared.outbound.lock() = None;

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_queue.max(1));
        self.pending_outbound = Some(outbound_tx);
        let cancel = CancellationToken::new();
        self.connection = Some(cancel.clone());
        self.set_state(ConnectionState::Connecting);
        info!(generation, attempt = self.attempt, url = %self.config.url, "connecting");

        let task = ConnectionTask {
            generation,
            config: self.config.clone(),
            internal: self.internal_tx.clone(),
            outbound: outbound_rx,
            shared: Arc::clone(&self.shared),
            cancel,
        };
        let span = info_span!("connection", generation, connection_id = %ConnectionId::new());
        drop(tokio::spawn(task.run().instrument(span)));
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
    }

    fn schedule_reconnect(&mut self, generation: u64, delay: Duration) {
        self.cancel_reconnect_timer();
        let timer = CancellationToken::new();
        self.reconnect_timer = Some(timer.clone());
        let internal = self.internal_tx.clone();
        drop(tokio::spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = internal.send(Internal::ReconnectDue { generation });
                }
            }
        }));
    }

    // ── Connection events ───────────────────────────────────────────

    async fn handle_internal(&mut self, message: Internal) -> bool {
        let current = self.current_generation();
        match message {
            Internal::Opened { generation } if generation == current && !self.intentional_close => {
                self.attempt = 0;
                *self.shared.outbound.lock() = self.pending_outbound.take();
                *self.shared.last_pong.lock() = Some(Instant::now());
                self.set_state(ConnectionState::Open);
                info!(generation, "connection open");
                self.emit(SupervisorEvent::Opened { generation }).await
            }
            Internal::Frame { generation, frame } if generation == current => {
                self.emit(SupervisorEvent::Inbound(frame)).await
            }
            Internal::Closed { generation, reason } if generation == current => {
                self.on_closed(generation, reason).await
            }
            Internal::ReconnectDue { generation }
                if generation == current
                    && self.reconnect_timer.is_some()
                    && !self.intentional_close =>
            {
                self.reconnect_timer = None;
                self.start_attempt();
                true
            }
            stale => {
                debug!(generation = stale.generation(), current, "stale connection event ignored");
                true
            }
        }
    }

    async fn on_closed(&mut self, generation: u64, reason: CloseReason) -> bool {
        self.connection = None;
        self.pending_outbound = None;
        *self.shared.outbound.lock() = None;

        let alive = self
            .emit(SupervisorEvent::Closed {
                generation,
                reason: reason.clone(),
            })
            .await;

        if self.intentional_close {
            info!(generation, "connection closed");
            self.set_state(ConnectionState::Closed);
            return alive;
        }

        self.attempt += 1;
        if self.config.reconnect.is_exhausted(self.attempt) {
            let attempts = self.attempt - 1;
            warn!(generation, attempts, %reason, "reconnect attempts exhausted");
            self.set_state(ConnectionState::Closed);
            return alive && self.emit(SupervisorEvent::RetriesExhausted { attempts }).await;
        }

        let delay = self
            .config
            .reconnect
            .delay_for(self.attempt, rand::random::<f64>());
        warn!(
            generation,
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            %reason,
            "connection lost, reconnecting"
        );
        self.set_state(ConnectionState::Connecting);
        self.schedule_reconnect(generation, delay);
        alive
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection task
// ─────────────────────────────────────────────────────────────────────────────

/// One connection attempt and, once open, its read/write/heartbeat loop.
struct ConnectionTask {
    generation: u64,
    config: SupervisorConfig,
    internal: mpsc::UnboundedSender<Internal>,
    outbound: mpsc::Receiver<String>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl ConnectionTask {
    async fn run(mut self) {
        let reason = self.drive().await;
        debug!(generation = self.generation, %reason, "connection task finished");
        let _ = self.internal.send(Internal::Closed {
            generation: self.generation,
            reason,
        });
    }

    async fn drive(&mut self) -> CloseReason {
        let ws = tokio::select! {
            () = self.cancel.cancelled() => return CloseReason::Requested,
            result = open(&self.config) => match result {
                Ok(ws) => ws,
                Err(error) => return CloseReason::Failed(error.to_string()),
            },
        };
        if self
            .internal
            .send(Internal::Opened {
                generation: self.generation,
            })
            .is_err()
        {
            return CloseReason::Requested;
        }

        let ping = OutboundFrame::ping()
            .to_text()
            .unwrap_or_else(|_| r#"{"type":"ping"}"#.to_owned());
        let (mut sink, mut stream) = ws.split();
        let mut heartbeat = Heartbeat::new(
            self.config.heartbeat_interval,
            self.config.pong_grace,
            Instant::now(),
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return CloseReason::Requested;
                }
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => self.on_text(text.as_str(), &mut heartbeat),
                    Some(Ok(Message::Pong(_))) => self.record_pong(&mut heartbeat),
                    Some(Ok(Message::Close(_))) | None => return CloseReason::ServerClosed,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => return CloseReason::Failed(error.to_string()),
                },
                Some(text) = self.outbound.recv() => {
                    if let Err(error) = sink.send(Message::text(text)).await {
                        return CloseReason::Failed(error.to_string());
                    }
                }
                () = tokio::time::sleep_until(heartbeat.next_wakeup()) => {
                    match heartbeat.poll(Instant::now()) {
                        HeartbeatAction::SendPing => {
                            if let Err(error) = sink.send(Message::text(ping.clone())).await {
                                return CloseReason::Failed(error.to_string());
                            }
                        }
                        HeartbeatAction::TimedOut => {
                            warn!(generation = self.generation, "no pong within grace window");
                            return CloseReason::HeartbeatTimeout;
                        }
                        HeartbeatAction::Idle => {}
                    }
                }
            }
        }
    }

    fn on_text(&self, text: &str, heartbeat: &mut Heartbeat) {
        match parse_frame(text) {
            Ok(frame) if matches!(frame.event, InboundEvent::Pong) => self.record_pong(heartbeat),
            Ok(frame) => {
                let _ = self.internal.send(Internal::Frame {
                    generation: self.generation,
                    frame,
                });
            }
            Err(error) => warn!(generation = self.generation, %error, "malformed frame dropped"),
        }
    }

    fn record_pong(&self, heartbeat: &mut Heartbeat) {
        let now = Instant::now();
        heartbeat.on_pong(now);
        *self.shared.last_pong.lock() = Some(now);
    }
}

async fn open(config: &SupervisorConfig) -> Result<WsStream, TransportError> {
    let timeout_ms = config.connect_timeout.as_millis() as u64;
    let (ws, _) = tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str()))
        .await
        .map_err(|_| TransportError::ConnectTimeout { timeout_ms })??;
    Ok(ws)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SupervisorConfig::new("ws://localhost/ws");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(25));
        assert_eq!(config.pong_grace, Duration::from_secs(8));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect.max_attempts, 6);
    }

    #[test]
    fn close_reason_display() {
        assert_eq!(CloseReason::HeartbeatTimeout.to_string(), "heartbeat timeout");
        assert_eq!(CloseReason::Failed("refused".into()).to_string(), "refused");
    }

    #[tokio::test]
    async fn idle_supervisor_refuses_sends() {
        let (handle, _events) = ChannelSupervisor::spawn(SupervisorConfig::new("ws://127.0.0.1:9/ws"));
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert_eq!(handle.generation(), 0);
        assert!(!handle.is_connected());
        assert!(!handle.send(&OutboundFrame::ping()));
        assert!(handle.last_pong_elapsed().is_none());
    }

    #[tokio::test]
    async fn shutdown_stops_the_actor() {
        let (handle, mut events) = ChannelSupervisor::spawn(SupervisorConfig::new("ws://127.0.0.1:9/ws"));
        assert!(handle.shutdown());
        assert!(events.recv().await.is_none());
        assert!(!handle.connect());
    }
}
