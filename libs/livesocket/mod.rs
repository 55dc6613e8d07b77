//! # LiveSocket
//!
//! Auto-reconnecting, topic-multiplexed WebSocket client for live market
//! data.
//!
//! ## Features
//!
//! - **One connection, many topics**: each topic gets its own multicast
//!   stream; consumers attach and detach freely
//! - **Explicit lifecycle**: a pure state machine decides, a single task acts
//! - **Exponential backoff**: capped delays, bounded attempt budget
//! - **Resubscription**: wanted topics are restored on every new connection
//! - **Keep-alive**: periodic pings, optional pong timeout
//! - **Pluggable transport and codec**: swap the socket out in tests

pub mod traits;
pub mod core;

// Re-export all traits
pub use traits::*;
pub use traits::{error, reconnect, transport};

// Re-export core client functionality
pub use crate::core::{
    client, codec, config, connection_state, heartbeat, lifecycle, manager, pong_tracker, registry,
    topics, ws_transport,
    client::LiveClient,
    codec::{ControlMessage, Envelope, Inbound, JsonCodec, MessageCodec, OutgoingMessage, Payload},
    config::{ClientConfig, ConfigError},
    connection_state::{AtomicMetrics, ConnectionState, Metrics},
    heartbeat::KeepAlivePolicy,
    manager::ClientEvent,
    registry::{TopicReceiver, TopicStream},
    topics::{Kline, OrderBook},
    ws_transport::WsConnector,
};
