//! Transport seam
//!
//! The Connection Manager never talks to a socket library directly. It asks a
//! [`Connector`] for a fresh [`Connection`] on every (re)connect and drives it
//! through three operations: send a frame, wait for the next frame, close.
//! Production code uses the tokio-tungstenite connector; tests inject an
//! in-memory one.

use crate::error::Result;
use async_trait::async_trait;

/// A single WebSocket data frame, Text or Binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WsMessage {
    /// Get the message as text, if it is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            WsMessage::Text(s) => Some(s),
            WsMessage::Binary(_) => None,
        }
    }

    /// Get the message as binary, if it is binary
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            WsMessage::Text(_) => None,
            WsMessage::Binary(b) => Some(b),
        }
    }
}

/// Opens physical connections
///
/// `connect` is the opaque connect step: handshake, TLS and any
/// authentication all happen behind it.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    async fn connect(&self, url: &str) -> Result<Self::Conn>;
}

/// An open physical connection
///
/// `recv` must be cancel-safe: the manager polls it inside `select!`
/// alongside commands and timers.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Write one frame
    async fn send(&mut self, frame: WsMessage) -> Result<()>;

    /// Wait for the next data frame
    ///
    /// # Returns
    /// * `Some(Ok(frame))` - a Text or Binary frame arrived
    /// * `Some(Err(e))` - transport error, the connection is unusable
    /// * `None` - the peer closed the connection
    async fn recv(&mut self) -> Option<Result<WsMessage>>;

    /// Close the connection, best effort
    async fn close(&mut self) -> Result<()>;
}
