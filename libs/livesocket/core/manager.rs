//! Connection manager
//!
//! Single task that owns the physical connection. Every input (user
//! commands, connect results, inbound frames, keep-alive ticks, backoff
//! expiry) is serialized through one `select!` loop and fed to the
//! [`Lifecycle`] state machine; the returned effects are executed here.
//!
//! ```text
//!  LiveClient ──Command──> ┌───────────────────────────────┐
//!                          │ select!                        │
//!  Connector  ──Conn────>  │   commands / connect / frames  │ ──> Lifecycle::handle
//!  Connection ──frames──>  │   keep-alive / backoff timer   │ <── Vec<Effect>
//!                          └───────────────────────────────┘
//!                              │                 │
//!                   TopicRegistry::deliver   ClientEvent (crossbeam)
//! ```

use crate::codec::{ControlMessage, Envelope, Inbound, MessageCodec, OutgoingMessage};
use crate::config::ClientConfig;
use crate::connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState};
use crate::error::{LiveSocketError, Result};
use crate::heartbeat::{KeepAliveMonitor, KeepAlivePolicy, KeepAliveTick};
use crate::lifecycle::{Effect, Lifecycle, LifecycleEvent};
use crate::registry::TopicRegistry;
use crate::transport::{Connection, Connector, WsMessage};
use crossbeam_channel::Sender;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Sleep};
use tracing::{debug, error, info, warn};

/// Upper bound on a graceful close before the connection is just dropped
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Requests from the client facade
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    Send(OutgoingMessage),
    Subscribe(String),
    Unsubscribe(String),
    Shutdown,
}

/// Notifications emitted by the manager
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Connection state changed
    StateChanged(ConnectionState),
    /// Backoff armed; the next connect attempt starts after `delay`
    Reconnecting { attempt: u32, delay: Duration },
    /// Attempt budget spent; the client stays disconnected until `connect()`
    ReconnectExhausted { attempts: u32 },
}

type PendingConnect<T> = BoxFuture<'static, Result<T>>;

pub(crate) struct ConnectionManager<C: Connector> {
    connector: Arc<C>,
    url: String,
    connect_timeout: Duration,
    keep_alive: KeepAlivePolicy,
    codec: Arc<dyn MessageCodec>,
    registry: Arc<TopicRegistry>,
    state: Arc<AtomicConnectionState>,
    metrics: Arc<AtomicMetrics>,
    event_tx: Sender<ClientEvent>,
    lifecycle: Lifecycle,
    conn: Option<C::Conn>,
    pending_connect: Option<PendingConnect<C::Conn>>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    keepalive: Option<KeepAliveMonitor>,
}

impl<C: Connector> ConnectionManager<C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: &ClientConfig,
        connector: Arc<C>,
        codec: Arc<dyn MessageCodec>,
        registry: Arc<TopicRegistry>,
        state: Arc<AtomicConnectionState>,
        metrics: Arc<AtomicMetrics>,
        event_tx: Sender<ClientEvent>,
    ) -> Self {
        Self {
            connector,
            url: config.endpoint_url.clone(),
            connect_timeout: config.connect_timeout(),
            keep_alive: config.keep_alive_policy(),
            codec,
            registry,
            state,
            metrics,
            event_tx,
            lifecycle: Lifecycle::new(Box::new(config.backoff())),
            conn: None,
            pending_connect: None,
            reconnect_timer: None,
            keepalive: None,
        }
    }

    /// Drive the connection until `Shutdown` arrives or every client handle
    /// is gone. All topic streams are closed on exit.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!(url = %self.url, "Connection manager started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
                result = connect_result(&mut self.pending_connect) => {
                    self.on_connect_result(result).await;
                }
                frame = next_frame(&mut self.conn) => {
                    self.on_frame(frame).await;
                }
                tick = next_tick(&mut self.keepalive) => {
                    self.on_keep_alive(tick).await;
                }
                _ = backoff_elapsed(&mut self.reconnect_timer) => {
                    self.apply(LifecycleEvent::BackoffElapsed).await;
                }
            }
        }

        self.apply(LifecycleEvent::DisconnectRequested).await;
        self.registry.close_all();
        info!("Connection manager stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.apply(LifecycleEvent::ConnectRequested).await,
            Command::Disconnect => self.apply(LifecycleEvent::DisconnectRequested).await,
            Command::Send(message) => {
                if !self.is_connected() {
                    debug!(error = %LiveSocketError::NotConnected, "Outgoing message dropped");
                    return;
                }
                self.write_or_fail(&message).await;
            }
            Command::Subscribe(topic) => {
                // while not connected the topic goes out with the resubscription
                if self.is_connected() && self.registry.mark_on_wire(&topic) {
                    self.write_or_fail(&ControlMessage::Subscribe { topic }.into())
                        .await;
                }
            }
            Command::Unsubscribe(topic) => {
                // never went out on this connection: nothing to retract
                if !self.registry.clear_on_wire(&topic) {
                    return;
                }
                let message = ControlMessage::Unsubscribe {
                    topic: topic.clone(),
                };
                self.write_or_fail(&message.into()).await;

                // wanted again before this command ran
                if self.is_connected() && self.registry.mark_on_wire(&topic) {
                    self.write_or_fail(&ControlMessage::Subscribe { topic }.into())
                        .await;
                }
            }
            Command::Shutdown => {}
        }
    }

    async fn on_connect_result(&mut self, result: Result<C::Conn>) {
        match result {
            Ok(mut conn) => {
                if self.lifecycle.state() != ConnectionState::Connecting {
                    let _ = timeout(CLOSE_TIMEOUT, conn.close()).await;
                    return;
                }
                info!(url = %self.url, "Connected");
                self.conn = Some(conn);
                self.apply(LifecycleEvent::Opened).await;
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "Connect attempt failed");
                self.apply(LifecycleEvent::TransportFailed).await;
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<WsMessage>>) {
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!(error = %e, "Connection error");
                self.apply(LifecycleEvent::TransportFailed).await;
                return;
            }
            None => {
                info!("Connection closed by server");
                self.apply(LifecycleEvent::TransportFailed).await;
                return;
            }
        };

        self.metrics.increment_received();
        match self.codec.decode(&frame) {
            Ok(Inbound::Data(Envelope { topic, payload, .. })) => {
                if !self.registry.deliver(&topic, payload) {
                    self.metrics.increment_dropped();
                    debug!(topic = %topic, "No stream for topic, envelope dropped");
                }
            }
            Ok(Inbound::Pong) => {
                if let Some(monitor) = self.keepalive.as_mut() {
                    monitor.record_pong();
                }
            }
            Ok(Inbound::Control { kind, body }) => {
                debug!(kind = %kind, %body, "Server control frame");
            }
            Err(e) => {
                self.metrics.increment_decode_errors();
                warn!(error = %e, "Undecodable frame dropped");
            }
        }
    }

    async fn on_keep_alive(&mut self, tick: KeepAliveTick) {
        match tick {
            KeepAliveTick::Probe => {
                debug!("Sending keep-alive ping");
                self.write_or_fail(&ControlMessage::Ping.into()).await;
            }
            KeepAliveTick::Expired => {
                warn!("Keep-alive pong overdue, forcing reconnect");
                self.apply(LifecycleEvent::KeepAliveExpired).await;
            }
        }
    }

    /// Feed one event to the state machine and run the resulting effects.
    /// Failures while executing effects are queued as follow-up events.
    async fn apply(&mut self, event: LifecycleEvent) {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let effects = self.lifecycle.handle(event);
            self.publish_state();

            for effect in effects {
                if let Some(follow_up) = self.execute(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    async fn execute(&mut self, effect: Effect) -> Option<LifecycleEvent> {
        match effect {
            Effect::OpenTransport => {
                info!(url = %self.url, "Connecting");
                self.pending_connect = Some(self.open_transport());
            }
            Effect::CloseTransport => {
                self.pending_connect = None;
                if let Some(mut conn) = self.conn.take() {
                    match timeout(CLOSE_TIMEOUT, conn.close()).await {
                        Ok(Ok(())) => debug!("Connection closed"),
                        Ok(Err(e)) => debug!(error = %e, "Close failed, connection dropped"),
                        Err(_) => debug!("Close timed out, connection dropped"),
                    }
                }
                self.registry.reset_wire_state();
            }
            Effect::StartKeepAlive => {
                self.keepalive = Some(KeepAliveMonitor::start(self.keep_alive));
            }
            Effect::StopKeepAlive => {
                self.keepalive = None;
            }
            Effect::ResubscribeAll => {
                let topics = self.registry.take_pending();
                if !topics.is_empty() {
                    info!(count = topics.len(), "Resubscribing topics");
                }
                for topic in topics {
                    let message: OutgoingMessage = ControlMessage::Subscribe { topic }.into();
                    if let Err(e) = self.write(&message).await {
                        warn!(error = %e, "Resubscription failed");
                        return Some(LifecycleEvent::TransportFailed);
                    }
                }
            }
            Effect::ScheduleReconnect { attempt, delay } => {
                info!(attempt, ?delay, "Reconnecting after backoff");
                self.metrics.increment_reconnects();
                self.reconnect_timer = Some(Box::pin(sleep(delay)));
                self.emit(ClientEvent::Reconnecting { attempt, delay });
            }
            Effect::CancelReconnect => {
                self.reconnect_timer = None;
            }
            Effect::ReconnectExhausted { attempts } => {
                error!(
                    error = %LiveSocketError::ReconnectionFailed { attempts },
                    "Giving up on {}", self.url
                );
                self.emit(ClientEvent::ReconnectExhausted { attempts });
            }
        }
        None
    }

    fn open_transport(&self) -> PendingConnect<C::Conn> {
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let limit = self.connect_timeout;

        Box::pin(async move {
            match timeout(limit, connector.connect(&url)).await {
                Ok(result) => result,
                Err(_) => Err(LiveSocketError::ConnectTimeout(limit)),
            }
        })
    }

    async fn write(&mut self, message: &OutgoingMessage) -> Result<()> {
        let frame = self.codec.encode(message);
        let conn = self.conn.as_mut().ok_or(LiveSocketError::NotConnected)?;
        conn.send(frame).await?;
        self.metrics.increment_sent();
        Ok(())
    }

    /// Write on the open connection; a failed write means the connection is gone
    async fn write_or_fail(&mut self, message: &OutgoingMessage) {
        if let Err(e) = self.write(message).await {
            warn!(error = %e, "Write failed");
            self.apply(LifecycleEvent::TransportFailed).await;
        }
    }

    fn is_connected(&self) -> bool {
        self.lifecycle.state() == ConnectionState::Connected
    }

    fn publish_state(&self) {
        let state = self.lifecycle.state();
        if self.state.set(state) {
            debug!(state = %state, "Connection state changed");
            self.emit(ClientEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: ClientEvent) {
        // nobody draining events is fine
        let _ = self.event_tx.send(event);
    }
}

async fn connect_result<T>(slot: &mut Option<PendingConnect<T>>) -> Result<T> {
    match slot.as_mut() {
        Some(connecting) => {
            let result = connecting.await;
            *slot = None;
            result
        }
        None => pending().await,
    }
}

async fn next_frame<T: Connection>(conn: &mut Option<T>) -> Option<Result<WsMessage>> {
    match conn.as_mut() {
        Some(conn) => conn.recv().await,
        None => pending().await,
    }
}

async fn next_tick(monitor: &mut Option<KeepAliveMonitor>) -> KeepAliveTick {
    match monitor.as_mut() {
        Some(monitor) => monitor.tick().await,
        None => pending().await,
    }
}

async fn backoff_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer.as_mut() {
        Some(sleeping) => {
            sleeping.await;
            *timer = None;
        }
        None => pending().await,
    }
}
