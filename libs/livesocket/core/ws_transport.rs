//! tokio-tungstenite implementation of the transport seam

use crate::error::{LiveSocketError, Result};
use crate::transport::{Connection, Connector, WsMessage};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Opens real WebSocket connections (ws:// and wss://)
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Conn = WsConnection;

    async fn connect(&self, url: &str) -> Result<Self::Conn> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| LiveSocketError::WebSocket(e.to_string()))?;
        debug!(url, status = %response.status(), "WebSocket handshake complete");
        Ok(WsConnection { stream })
    }
}

/// An open tokio-tungstenite stream
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, frame: WsMessage) -> Result<()> {
        self.stream
            .send(ws_message_to_tungstenite(frame))
            .await
            .map_err(|e| LiveSocketError::WebSocket(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Close frame received");
                    return None;
                }
                Ok(msg) => {
                    // protocol ping/pong frames are answered by tungstenite itself
                    if let Some(ws_msg) = tungstenite_to_ws_message(msg) {
                        return Some(Ok(ws_msg));
                    }
                }
                Err(e) => return Some(Err(LiveSocketError::WebSocket(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| LiveSocketError::WebSocket(e.to_string()))
    }
}

/// Convert WsMessage to tungstenite Message
fn ws_message_to_tungstenite(msg: WsMessage) -> Message {
    match msg {
        WsMessage::Text(text) => Message::Text(text),
        WsMessage::Binary(data) => Message::Binary(data),
    }
}

/// Convert tungstenite Message to WsMessage
fn tungstenite_to_ws_message(msg: Message) -> Option<WsMessage> {
    match msg {
        Message::Text(text) => Some(WsMessage::Text(text)),
        Message::Binary(data) => Some(WsMessage::Binary(data)),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}
