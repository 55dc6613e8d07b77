use thiserror::Error;

/// Main error type for livesocket
#[derive(Error, Debug)]
pub enum LiveSocketError {
    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Connection closed by the peer or the network
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The opaque connect step did not complete in time
    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// Operation requires an established connection
    #[error("Not connected")]
    NotConnected,

    /// Inbound frame could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Channel send error (driver task gone)
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Reconnection budget exhausted
    #[error("Reconnection failed after {attempts} attempts")]
    ReconnectionFailed { attempts: u32 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Reasons an inbound frame is rejected by the codec
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("binary frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("frame has no string `topic` field")]
    MissingTopic,

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Result type for livesocket operations
pub type Result<T> = std::result::Result<T, LiveSocketError>;
