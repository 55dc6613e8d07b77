//! Client internals: wire codec, topic registry, keep-alive, the connection
//! lifecycle and the facade tying them together.

pub mod client;
pub mod codec;
pub mod config;
pub mod connection_state;
pub mod heartbeat;
pub mod lifecycle;
pub mod manager;
pub mod pong_tracker;
pub mod registry;
pub mod topics;
pub mod ws_transport;

// Re-export main types
pub use client::LiveClient;
pub use codec::{ControlMessage, Envelope, Inbound, JsonCodec, MessageCodec, OutgoingMessage, Payload};
pub use config::{ClientConfig, ConfigError};
pub use connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState, Metrics};
pub use heartbeat::{KeepAliveMonitor, KeepAlivePolicy, KeepAliveTick};
pub use lifecycle::{Effect, Lifecycle, LifecycleEvent, ReconnectState};
pub use manager::ClientEvent;
pub use pong_tracker::PongTracker;
pub use registry::{TopicReceiver, TopicRegistry, TopicStream};
pub use ws_transport::{WsConnection, WsConnector};
