//! PONG Response Tracker
//!
//! Tracks probe/response timing to detect dead or zombie connections: open at
//! the transport layer but no longer carrying traffic. A connection is
//! considered unhealthy if no PONG arrives within the configured timeout after
//! a PING was sent.

use std::time::Duration;
use tokio::time::Instant;

/// Tracks PONG responses to detect dead connections
///
/// Owned by the keep-alive monitor of a single connection, so plain fields
/// suffice. Uses tokio's clock so paused-time tests see consistent values.
#[derive(Debug)]
pub struct PongTracker {
    /// Oldest PING not yet answered by a later PONG
    last_ping_sent: Option<Instant>,
    last_pong_received: Option<Instant>,
    /// If no PONG within this duration after a PING, the connection is unhealthy
    timeout: Duration,
}

impl PongTracker {
    /// # Arguments
    /// * `timeout` - Duration to wait for PONG after PING
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_ping_sent: None,
            last_pong_received: None,
            timeout,
        }
    }

    /// Record a PING going out
    ///
    /// While an earlier PING is still unanswered its send time is kept, so the
    /// timeout runs from the first probe the peer ignored.
    pub fn record_ping_sent(&mut self) {
        if !self.awaiting_pong() {
            self.last_ping_sent = Some(Instant::now());
        }
    }

    pub fn record_pong_received(&mut self) {
        self.last_pong_received = Some(Instant::now());
    }

    fn awaiting_pong(&self) -> bool {
        match (self.last_ping_sent, self.last_pong_received) {
            (None, _) => false,
            (Some(ping), Some(pong)) => pong < ping,
            (Some(_), None) => true,
        }
    }

    /// Check if the connection appears healthy
    ///
    /// Healthy when no PING is outstanding, or while the timeout since the
    /// oldest unanswered PING has not elapsed.
    pub fn is_healthy(&self) -> bool {
        match self.last_ping_sent {
            Some(ping) if self.awaiting_pong() => ping.elapsed() < self.timeout,
            _ => true,
        }
    }

    /// Time since the oldest unanswered PING (or the last answered one),
    /// `None` if none was ever sent
    pub fn time_since_last_ping(&self) -> Option<Duration> {
        self.last_ping_sent.map(|ping| ping.elapsed())
    }
}
