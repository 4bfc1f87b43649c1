//! Outbound keepalive tracking.
//!
//! The server owes each host a frame at least every `interval`. Any outbound
//! write counts, so keepalives only go out on otherwise idle connections.
//! If nothing has been written for longer than `timeout` (the timer was
//! starved or writes are stuck), the peer is treated as dead.
//!
//! [`KeepAlive`] is a pure state machine. The connection handle owns one
//! inside its write guard and polls it from a timer task, so the decision to
//! send and the send itself can never race another writer.

use std::time::Duration;

use tokio::time::Instant;

use crate::utils::timeout::{KEEPALIVE_INTERVAL, KEEPALIVE_TIMEOUT};

/// What the timer should do on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveAction {
    /// Recent traffic; nothing to do.
    Idle,
    /// Interval elapsed with no outbound traffic.
    SendKeepAlive,
    /// Silent beyond the dead-peer bound; disconnect.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct KeepAlive {
    interval: Duration,
    timeout: Duration,
    last_activity: Instant,
}

impl KeepAlive {
    /// Start tracking at `now`.
    pub fn new(interval: Duration, timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            last_activity: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record an outbound write at `now`.
    pub fn mark_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Decide what to do at `now`.
    pub fn poll(&self, now: Instant) -> KeepAliveAction {
        let idle = self.idle_for(now);
        if idle > self.timeout {
            KeepAliveAction::TimedOut
        } else if idle >= self.interval {
            KeepAliveAction::SendKeepAlive
        } else {
            KeepAliveAction::Idle
        }
    }
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self::new(KEEPALIVE_INTERVAL, KEEPALIVE_TIMEOUT, Instant::now())
    }
}
