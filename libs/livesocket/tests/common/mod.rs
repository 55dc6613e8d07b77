//! Common test utilities for LiveSocket integration tests
//!
//! - [`FakeConnector`] / [`FakeNetwork`]: in-memory transport. The test plays
//!   the server side through a [`FakePeer`] per accepted connection.
//! - [`MockWsServer`]: a real tokio-tungstenite server on localhost.

#![allow(dead_code)]

use async_trait::async_trait;
use livesocket::{Connection, Connector, LiveSocketError, Result, WsMessage};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Notify};

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

/// How long `accept`/`next_sent` wait before failing the test. Under paused
/// time this elapses instantly once nothing else is scheduled.
const WAIT_LIMIT: Duration = Duration::from_secs(3600);

#[derive(Debug, Default)]
struct NetworkControl {
    attempts: AtomicU32,
    refuse_next: AtomicU32,
    refuse_all: AtomicBool,
}

/// Connector side, handed to the client
#[derive(Clone)]
pub struct FakeConnector {
    control: Arc<NetworkControl>,
    peers: mpsc::UnboundedSender<FakePeer>,
}

/// Test side: accepts connections and controls failures
pub struct FakeNetwork {
    control: Arc<NetworkControl>,
    peers: mpsc::UnboundedReceiver<FakePeer>,
}

pub fn fake_network() -> (FakeConnector, FakeNetwork) {
    let control = Arc::new(NetworkControl::default());
    let (tx, rx) = mpsc::unbounded_channel();
    (
        FakeConnector {
            control: Arc::clone(&control),
            peers: tx,
        },
        FakeNetwork { control, peers: rx },
    )
}

impl FakeNetwork {
    /// Refuse the next `n` connect attempts
    pub fn refuse_next(&self, n: u32) {
        self.control.refuse_next.store(n, Ordering::SeqCst);
    }

    /// Refuse every connect attempt until called with `false`
    pub fn refuse_all(&self, refuse: bool) {
        self.control.refuse_all.store(refuse, Ordering::SeqCst);
    }

    /// Connect attempts seen so far, refused ones included
    pub fn attempts(&self) -> u32 {
        self.control.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the client to open a connection
    pub async fn accept(&mut self) -> FakePeer {
        tokio::time::timeout(WAIT_LIMIT, self.peers.recv())
            .await
            .expect("client never connected")
            .expect("connector dropped")
    }

    pub fn try_accept(&mut self) -> Option<FakePeer> {
        self.peers.try_recv().ok()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Conn = FakeConnection;

    async fn connect(&self, _url: &str) -> Result<FakeConnection> {
        self.control.attempts.fetch_add(1, Ordering::SeqCst);

        if self.control.refuse_all.load(Ordering::SeqCst) {
            return Err(LiveSocketError::WebSocket("connection refused".into()));
        }
        let refused = self
            .control
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(LiveSocketError::WebSocket("connection refused".into()));
        }

        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();
        let peer = FakePeer {
            to_client,
            from_client,
        };
        self.peers
            .send(peer)
            .map_err(|_| LiveSocketError::WebSocket("network gone".into()))?;

        Ok(FakeConnection {
            to_server,
            from_server,
        })
    }
}

enum ServerFrame {
    Frame(WsMessage),
    Close,
}

/// Client end of an in-memory connection
pub struct FakeConnection {
    to_server: mpsc::UnboundedSender<WsMessage>,
    from_server: mpsc::UnboundedReceiver<ServerFrame>,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn send(&mut self, frame: WsMessage) -> Result<()> {
        self.to_server
            .send(frame)
            .map_err(|_| LiveSocketError::ConnectionClosed("peer gone".into()))
    }

    async fn recv(&mut self) -> Option<Result<WsMessage>> {
        match self.from_server.recv().await {
            Some(ServerFrame::Frame(frame)) => Some(Ok(frame)),
            Some(ServerFrame::Close) | None => None,
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.from_server.close();
        Ok(())
    }
}

/// Server end of an in-memory connection
pub struct FakePeer {
    to_client: mpsc::UnboundedSender<ServerFrame>,
    from_client: mpsc::UnboundedReceiver<WsMessage>,
}

impl FakePeer {
    pub fn inject(&self, frame: WsMessage) {
        let _ = self.to_client.send(ServerFrame::Frame(frame));
    }

    pub fn inject_text(&self, text: impl Into<String>) {
        self.inject(WsMessage::Text(text.into()));
    }

    pub fn inject_json(&self, value: Value) {
        self.inject_text(value.to_string());
    }

    /// Server-initiated close
    pub fn close(&self) {
        let _ = self.to_client.send(ServerFrame::Close);
    }

    /// Next frame written by the client, pings included
    pub async fn next_sent(&mut self) -> Option<WsMessage> {
        tokio::time::timeout(WAIT_LIMIT, self.from_client.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next non-ping frame written by the client, as JSON
    pub async fn next_sent_json(&mut self) -> Value {
        loop {
            let frame = self.next_sent().await.expect("client sent nothing");
            let value = frame_json(&frame);
            if !is_ping(&value) {
                return value;
            }
        }
    }

    /// Every frame written so far, without waiting
    pub fn drain_sent(&mut self) -> Vec<Value> {
        std::iter::from_fn(|| self.from_client.try_recv().ok())
            .map(|frame| frame_json(&frame))
            .collect()
    }

    /// Like [`drain_sent`](Self::drain_sent) with pings filtered out
    pub fn drain_sent_without_pings(&mut self) -> Vec<Value> {
        self.drain_sent().into_iter().filter(|v| !is_ping(v)).collect()
    }

    /// Whether the client end was dropped or closed
    pub fn is_client_gone(&self) -> bool {
        self.to_client.is_closed()
    }
}

pub fn frame_json(frame: &WsMessage) -> Value {
    let text = frame.as_text().expect("client frames are text");
    serde_json::from_str(text).expect("client frames are JSON")
}

pub fn is_ping(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some("ping")
}

/// Let the connection task catch up with everything queued so far
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// A mock stream server on a real socket
///
/// Speaks the JSON envelope protocol: a SUBSCRIBE is acknowledged and
/// answered with one data envelope for that topic, a ping with a pong.
pub struct MockWsServer {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
    kick: Arc<watch::Sender<u64>>,
    connections: Arc<AtomicUsize>,
    subscribes: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Create and start a new mock WebSocket server
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let kick = Arc::new(watch::channel(0u64).0);
        let connections = Arc::new(AtomicUsize::new(0));
        let subscribes = Arc::new(AtomicUsize::new(0));

        let server = Self {
            addr,
            shutdown: Arc::clone(&shutdown),
            kick: Arc::clone(&kick),
            connections: Arc::clone(&connections),
            subscribes: Arc::clone(&subscribes),
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                connections.fetch_add(1, Ordering::SeqCst);
                                let kicked = kick.subscribe();
                                let subscribes = Arc::clone(&subscribes);
                                tokio::spawn(async move {
                                    Self::handle_connection(stream, kicked, subscribes).await;
                                });
                            }
                            Err(e) => {
                                eprintln!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown.notified() => {
                        break;
                    }
                }
            }
        });

        server
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        mut kicked: watch::Receiver<u64>,
        subscribes: Arc<AtomicUsize>,
    ) {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::accept_async;
        use tokio_tungstenite::tungstenite::Message;

        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                eprintln!("WebSocket handshake failed: {}", e);
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => continue,
                    };
                    let request: Value = match serde_json::from_str(&text) {
                        Ok(value) => value,
                        Err(_) => continue,
                    };

                    let mut replies = Vec::new();
                    match request.get("type").and_then(Value::as_str) {
                        Some("ping") => replies.push(serde_json::json!({"type": "pong"})),
                        Some("SUBSCRIBE") => {
                            subscribes.fetch_add(1, Ordering::SeqCst);
                            let topic = request["topic"].clone();
                            replies.push(serde_json::json!({"type": "subscribed", "topic": topic}));
                            replies.push(serde_json::json!({
                                "topic": topic,
                                "payload": {"seq": 1},
                                "timestamp": 1714564800000i64
                            }));
                        }
                        _ => {}
                    }
                    for reply in replies {
                        if write.send(Message::Text(reply.to_string())).await.is_err() {
                            return;
                        }
                    }
                }
                _ = kicked.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    /// Get the WebSocket URL for this server
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Close every open connection; the listener keeps accepting
    pub fn kick_all(&self) {
        self.kick.send_modify(|generation| *generation += 1);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
