//! Keep-alive monitor
//!
//! # Architecture
//!
//! The monitor is a value owned by the connection manager, created on entry to
//! `Connected` and dropped on any exit from it. Its ticker is polled from the
//! manager's `select!` loop, so there is no separate task to leak:
//!
//! ```text
//! ┌──────────────────────────┐
//! │  Manager select! loop    │
//! │                          │
//! │  keepalive.tick() ───────┼──> Probe   ──> codec.encode(ping) ──> Connection
//! │                          │──> Expired ──> TransportFailed (reconnect)
//! │  Inbound::Pong ──────────┼──> keepalive.record_pong()
//! └──────────────────────────┘
//! ```
//!
//! Without a pong timeout the monitor is fire-and-forget: it only probes.
//! With one, a probe tick that finds the oldest unanswered PING older than the
//! timeout reports `Expired`, however many probes were sent since.

use super::pong_tracker::PongTracker;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Externally configured keep-alive behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlivePolicy {
    /// Time between probes
    pub interval: Duration,
    /// Force a reconnect when a probe is unanswered this long (None = never)
    pub pong_timeout: Option<Duration>,
}

/// Outcome of one monitor tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveTick {
    /// Send a ping now
    Probe,
    /// The connection stopped answering probes
    Expired,
}

#[derive(Debug)]
pub struct KeepAliveMonitor {
    ticker: Interval,
    tracker: Option<PongTracker>,
}

impl KeepAliveMonitor {
    /// Start probing; the first tick fires one full interval from now
    pub fn start(policy: KeepAlivePolicy) -> Self {
        let period = policy.interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        // If we miss ticks due to slow processing, skip them rather than bursting
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(interval = ?period, pong_timeout = ?policy.pong_timeout, "Keep-alive started");

        Self {
            ticker,
            tracker: policy.pong_timeout.map(PongTracker::new),
        }
    }

    /// Wait for the next tick. Cancel-safe.
    pub async fn tick(&mut self) -> KeepAliveTick {
        self.ticker.tick().await;

        if let Some(tracker) = self.tracker.as_mut() {
            if !tracker.is_healthy() {
                debug!(since_ping = ?tracker.time_since_last_ping(), "Keep-alive expired");
                return KeepAliveTick::Expired;
            }
            tracker.record_ping_sent();
        }
        KeepAliveTick::Probe
    }

    /// A liveness response arrived
    pub fn record_pong(&mut self) {
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.record_pong_received();
        }
    }
}
