//! Heartbeat ping/pong liveness monitoring.
//!
//! The connection task owns one [`Heartbeat`] and sleeps until
//! [`Heartbeat::next_wakeup`]. On each wakeup it calls [`Heartbeat::poll`]:
//! a ping is due every `interval`, and once a ping is outstanding the peer
//! has `grace` to answer before the connection is declared dead. Any pong
//! clears the outstanding ping.

use std::time::Duration;

use tokio::time::Instant;

/// What the connection task should do after a poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping now.
    SendPing,
    /// The outstanding ping was not answered within the grace window.
    TimedOut,
    /// Nothing to do yet.
    Idle,
}

/// Liveness state of one connection.
#[derive(Clone, Debug)]
pub struct Heartbeat {
    interval: Duration,
    grace: Duration,
    next_ping: Instant,
    awaiting_since: Option<Instant>,
    last_pong: Instant,
}

impl Heartbeat {
    /// Start tracking a connection that opened at `now`.
    #[must_use]
    pub fn new(interval: Duration, grace: Duration, now: Instant) -> Self {
        Self {
            interval,
            grace,
            next_ping: now + interval,
            awaiting_since: None,
            last_pong: now,
        }
    }

    /// When the next poll is due.
    #[must_use]
    pub fn next_wakeup(&self) -> Instant {
        self.awaiting_since
            .map_or(self.next_ping, |sent| sent + self.grace)
    }

    /// Advance to `now`.
    pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
        if let Some(sent) = self.awaiting_since {
            return if now >= sent + self.grace {
                HeartbeatAction::TimedOut
            } else {
                HeartbeatAction::Idle
            };
        }
        if now < self.next_ping {
            return HeartbeatAction::Idle;
        }
        self.awaiting_since = Some(now);
        self.next_ping = now + self.interval;
        HeartbeatAction::SendPing
    }

    /// Record a pong.
    pub fn on_pong(&mut self, now: Instant) {
        self.awaiting_since = None;
        self.last_pong = now;
    }

    /// Whether a ping is waiting for its pong.
    #[must_use]
    pub fn is_awaiting_pong(&self) -> bool {
        self.awaiting_since.is_some()
    }

    /// Last pong (or the connection's open time).
    #[must_use]
    pub fn last_pong(&self) -> Instant {
        self.last_pong
    }
}
