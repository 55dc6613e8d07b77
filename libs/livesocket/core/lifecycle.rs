//! Connection lifecycle state machine
//!
//! Pure transition logic: every transport event, timer expiry and user
//! request maps to exactly one call of [`Lifecycle::handle`], which updates
//! the state and returns the side effects the driver must perform. Nothing
//! here touches a socket or a timer, so every transition is testable in
//! isolation.
//!
//! ```text
//!                 connect()
//!  Disconnected ────────────> Connecting ──opened──> Connected
//!       ^                      │    ^                    │
//!       │ budget exhausted     │    │ backoff elapsed    │ failure / close
//!       │                      v    │                    v
//!       └──────────────────── Reconnecting <─────────────┘
//!  (disconnect() from any state goes straight to Disconnected)
//! ```

use crate::connection_state::ConnectionState;
use crate::reconnect::ReconnectionStrategy;
use std::time::Duration;

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// `connect()` was called
    ConnectRequested,
    /// The transport reported "open"
    Opened,
    /// Connect failed, or the open connection errored or closed
    TransportFailed,
    /// The keep-alive monitor saw no pong within the timeout
    KeepAliveExpired,
    /// The backoff timer fired
    BackoffElapsed,
    /// `disconnect()` was called
    DisconnectRequested,
}

/// Side effects requested by a transition, to be executed in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Start the opaque connect step
    OpenTransport,
    /// Drop the physical connection (or abandon a pending connect)
    CloseTransport,
    StartKeepAlive,
    StopKeepAlive,
    /// Issue one subscribe frame per wanted topic
    ResubscribeAll,
    /// Arm the cancelable backoff timer
    ScheduleReconnect { attempt: u32, delay: Duration },
    CancelReconnect,
    /// Attempt budget exhausted; surface the fatal error
    ReconnectExhausted { attempts: u32 },
}

/// Backoff bookkeeping, reset on every successful connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectState {
    pub attempt: u32,
    pub last_delay: Duration,
}

pub struct Lifecycle {
    state: ConnectionState,
    reconnect: ReconnectState,
    strategy: Box<dyn ReconnectionStrategy>,
}

impl Lifecycle {
    pub fn new(strategy: Box<dyn ReconnectionStrategy>) -> Self {
        let reconnect = ReconnectState {
            attempt: 0,
            last_delay: strategy.base_delay(),
        };
        Self {
            state: ConnectionState::Disconnected,
            reconnect,
            strategy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_state(&self) -> ReconnectState {
        self.reconnect
    }

    /// Apply one event; events that make no sense in the current state are
    /// ignored and yield no effects.
    pub fn handle(&mut self, event: LifecycleEvent) -> Vec<Effect> {
        use ConnectionState::*;
        use LifecycleEvent::*;

        match (self.state, event) {
            (Disconnected, ConnectRequested) => {
                self.state = Connecting;
                vec![Effect::OpenTransport]
            }
            // skip the remaining wait, keep the attempt count
            (Reconnecting, ConnectRequested) => {
                self.state = Connecting;
                vec![Effect::CancelReconnect, Effect::OpenTransport]
            }
            (Connecting, Opened) => {
                self.state = Connected;
                self.reset_reconnect();
                vec![Effect::StartKeepAlive, Effect::ResubscribeAll]
            }
            (Connecting, TransportFailed) | (Connecting, KeepAliveExpired) => {
                let mut effects = vec![Effect::CloseTransport];
                effects.extend(self.enter_reconnecting());
                effects
            }
            (Connected, TransportFailed) | (Connected, KeepAliveExpired) => {
                let mut effects = vec![Effect::StopKeepAlive, Effect::CloseTransport];
                effects.extend(self.enter_reconnecting());
                effects
            }
            (Reconnecting, BackoffElapsed) => {
                self.state = Connecting;
                vec![Effect::OpenTransport]
            }
            (Connected, DisconnectRequested) => {
                self.state = Disconnected;
                self.reset_reconnect();
                vec![Effect::StopKeepAlive, Effect::CloseTransport]
            }
            (Connecting, DisconnectRequested) => {
                self.state = Disconnected;
                self.reset_reconnect();
                vec![Effect::CloseTransport]
            }
            (Reconnecting, DisconnectRequested) => {
                self.state = Disconnected;
                self.reset_reconnect();
                vec![Effect::CancelReconnect]
            }
            _ => Vec::new(),
        }
    }

    fn enter_reconnecting(&mut self) -> Vec<Effect> {
        match self.strategy.next_delay(self.reconnect.attempt) {
            Some(delay) => {
                self.reconnect.attempt += 1;
                self.reconnect.last_delay = delay;
                self.state = ConnectionState::Reconnecting;
                vec![Effect::ScheduleReconnect {
                    attempt: self.reconnect.attempt,
                    delay,
                }]
            }
            None => {
                let attempts = self.reconnect.attempt;
                self.state = ConnectionState::Disconnected;
                self.reset_reconnect();
                vec![Effect::ReconnectExhausted { attempts }]
            }
        }
    }

    fn reset_reconnect(&mut self) {
        self.reconnect = ReconnectState {
            attempt: 0,
            last_delay: self.strategy.base_delay(),
        };
    }
}
