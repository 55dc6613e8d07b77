use crate::codec::{JsonCodec, MessageCodec, OutgoingMessage};
use crate::config::ClientConfig;
use crate::connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState, Metrics};
use crate::error::{LiveSocketError, Result};
use crate::manager::{ClientEvent, Command, ConnectionManager};
use crate::registry::{TopicRegistry, TopicStream};
use crate::transport::Connector;
use crate::ws_transport::WsConnector;
use crossbeam_channel::{unbounded, Receiver};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Auto-reconnecting, topic-multiplexed WebSocket client
///
/// The facade is cheap to call from anywhere: every operation is legal in
/// every connection state and none of them block on the network. The
/// physical connection lives in a background task that is spawned on
/// construction, so constructors must run inside a tokio runtime.
///
/// ```ignore
/// let client = LiveClient::new(ClientConfig::new("wss://example.com/ws"))?;
/// let stream = client.subscribe(&topics::kline("BTCUSDT"));
/// client.connect();
///
/// let mut rx = stream.subscribe();
/// while let Some(candle) = rx.recv_as::<Kline>().await {
///     println!("{} closed at {}", candle.symbol, candle.close);
/// }
/// ```
pub struct LiveClient {
    config: Arc<ClientConfig>,
    registry: Arc<TopicRegistry>,
    state: Arc<AtomicConnectionState>,
    metrics: Arc<AtomicMetrics>,
    command_tx: mpsc::UnboundedSender<Command>,
    event_rx: Receiver<ClientEvent>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl LiveClient {
    /// Client over real WebSocket connections with the JSON envelope codec
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_connector(config, WsConnector::new())
    }

    /// Client over a custom transport
    pub fn with_connector<C: Connector>(config: ClientConfig, connector: C) -> Result<Self> {
        Self::with_parts(config, connector, Arc::new(JsonCodec::new()))
    }

    /// Client over a custom transport and wire format
    pub fn with_parts<C: Connector>(
        config: ClientConfig,
        connector: C,
        codec: Arc<dyn MessageCodec>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| LiveSocketError::Configuration(e.to_string()))?;

        let config = Arc::new(config);
        let registry = Arc::new(TopicRegistry::new(config.stream_capacity));
        let state = Arc::new(AtomicConnectionState::new(ConnectionState::Disconnected));
        let metrics = Arc::new(AtomicMetrics::new());

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = unbounded();

        let manager = ConnectionManager::new(
            &config,
            Arc::new(connector),
            codec,
            Arc::clone(&registry),
            Arc::clone(&state),
            Arc::clone(&metrics),
            event_tx,
        );
        let task_handle = tokio::spawn(manager.run(command_rx));

        Ok(Self {
            config,
            registry,
            state,
            metrics,
            command_tx,
            event_rx,
            task_handle: Some(task_handle),
        })
    }

    /// Start connecting. No-op while connecting or connected; during backoff
    /// the remaining wait is skipped.
    pub fn connect(&self) {
        if !self.config.enabled {
            warn!(url = %self.config.endpoint_url, "Streaming disabled by configuration, not connecting");
            return;
        }
        self.dispatch(Command::Connect);
    }

    /// Close the connection and cancel any pending reconnect. Wanted topics
    /// and their streams are kept for the next `connect()`.
    pub fn disconnect(&self) {
        self.dispatch(Command::Disconnect);
    }

    /// The stream for `topic`, created on first use
    ///
    /// Repeated calls return the same stream. Subscribing while disconnected
    /// only records the topic; the subscribe frame goes out once connected.
    pub fn subscribe(&self, topic: &str) -> TopicStream {
        let (stream, created) = self.registry.subscribe(topic);
        if created {
            self.dispatch(Command::Subscribe(topic.to_string()));
        }
        stream
    }

    /// Forget `topic` and end its stream. Unknown topics are ignored.
    pub fn unsubscribe(&self, topic: &str) {
        if self.registry.unsubscribe(topic) {
            self.dispatch(Command::Unsubscribe(topic.to_string()));
        }
    }

    /// Write a message if connected; otherwise it is dropped and logged
    pub fn send(&self, message: impl Into<OutgoingMessage>) {
        if let Err(e) = self.try_send(message) {
            debug!(error = %e, "Message not sent");
        }
    }

    /// Like [`send`](Self::send) but reports why the message was not queued
    ///
    /// `Ok` means the message was handed to the connection task; the write
    /// itself can still fail if the connection drops at the same moment.
    pub fn try_send(&self, message: impl Into<OutgoingMessage>) -> Result<()> {
        if !self.state.is_connected() {
            return Err(LiveSocketError::NotConnected);
        }
        self.command_tx
            .send(Command::Send(message.into()))
            .map_err(|e| LiveSocketError::ChannelSend(e.to_string()))
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Observe state changes (e.g. for a status indicator)
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Topics that will be restored on every new connection
    pub fn wanted_topics(&self) -> Vec<String> {
        self.registry.wanted_topics()
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv_event(&self) -> Option<ClientEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive an event (blocking)
    pub fn recv_event(&self) -> std::result::Result<ClientEvent, crossbeam_channel::RecvError> {
        self.event_rx.recv()
    }

    /// Disconnect, stop the connection task and close every topic stream
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Shutting down stream client");
        let _ = self.command_tx.send(Command::Shutdown);

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| LiveSocketError::ChannelSend(format!("connection task failed: {}", e)))?;
        }
        Ok(())
    }

    fn dispatch(&self, command: Command) {
        if let Err(e) = self.command_tx.send(command) {
            warn!(error = %e, "Connection task is gone, command dropped");
        }
    }
}
