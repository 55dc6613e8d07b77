//! Message codec
//!
//! Isolates the JSON wire format from the rest of the client.
//!
//! Outbound:
//! ```text
//! {"type":"SUBSCRIBE","topic":"kline:BTCUSDT"}
//! {"type":"UNSUBSCRIBE","topic":"kline:BTCUSDT"}
//! {"type":"ping"}
//! {"topic":"orders","payload":{...}}          // user data
//! ```
//!
//! Inbound data frames carry `{"topic", "payload", "timestamp"?}`; objects with
//! a `type` discriminator are control frames. A bare `pong` text frame is also
//! accepted as a liveness response.

use crate::error::DecodeError;
use crate::transport::WsMessage;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Opaque topic payload
pub type Payload = Value;

/// The wire unit routed by topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, payload: Payload) -> Self {
        Self {
            topic: topic.into(),
            payload,
            timestamp: None,
        }
    }
}

/// Control messages the client writes on its own behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Ping,
}

/// Anything a collaborator can write through the client
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingMessage {
    Control(ControlMessage),
    /// A data envelope addressed to a topic
    Publish(Envelope),
    /// Arbitrary JSON, written as-is
    Json(Value),
}

impl From<ControlMessage> for OutgoingMessage {
    fn from(message: ControlMessage) -> Self {
        OutgoingMessage::Control(message)
    }
}

impl From<Value> for OutgoingMessage {
    fn from(value: Value) -> Self {
        OutgoingMessage::Json(value)
    }
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Topic data, to be routed
    Data(Envelope),
    /// Liveness response
    Pong,
    /// Server control frame (acks, errors); logged, never routed
    Control { kind: String, body: Value },
}

/// Wire format boundary
pub trait MessageCodec: Send + Sync + 'static {
    /// Serialize an outgoing message. Infallible for representable inputs.
    fn encode(&self, message: &OutgoingMessage) -> WsMessage;

    /// Parse an inbound frame
    fn decode(&self, frame: &WsMessage) -> Result<Inbound, DecodeError>;
}

/// The JSON envelope codec spoken by the dashboard backend
#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

impl MessageCodec for JsonCodec {
    fn encode(&self, message: &OutgoingMessage) -> WsMessage {
        let value = match message {
            OutgoingMessage::Control(ControlMessage::Subscribe { topic }) => {
                json!({ "type": "SUBSCRIBE", "topic": topic })
            }
            OutgoingMessage::Control(ControlMessage::Unsubscribe { topic }) => {
                json!({ "type": "UNSUBSCRIBE", "topic": topic })
            }
            OutgoingMessage::Control(ControlMessage::Ping) => json!({ "type": "ping" }),
            OutgoingMessage::Publish(envelope) => {
                let mut object = Map::new();
                object.insert("topic".into(), Value::String(envelope.topic.clone()));
                object.insert("payload".into(), envelope.payload.clone());
                if let Some(ts) = envelope.timestamp {
                    object.insert("timestamp".into(), Value::String(ts.to_rfc3339()));
                }
                Value::Object(object)
            }
            OutgoingMessage::Json(value) => value.clone(),
        };
        WsMessage::Text(value.to_string())
    }

    fn decode(&self, frame: &WsMessage) -> Result<Inbound, DecodeError> {
        let text = match frame {
            WsMessage::Text(text) => text.as_str(),
            WsMessage::Binary(bytes) => {
                std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?
            }
        };

        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("pong") {
            return Ok(Inbound::Pong);
        }

        let value: Value =
            serde_json::from_str(trimmed).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
        let mut object = match value {
            Value::Object(object) => object,
            _ => return Err(DecodeError::MissingTopic),
        };

        if let Some(kind) = object.get("type").and_then(Value::as_str) {
            if kind.eq_ignore_ascii_case("pong") {
                return Ok(Inbound::Pong);
            }
            return Ok(Inbound::Control {
                kind: kind.to_string(),
                body: Value::Object(object),
            });
        }

        let topic = match object.remove("topic") {
            Some(Value::String(topic)) => topic,
            _ => return Err(DecodeError::MissingTopic),
        };
        let payload = object.remove("payload").unwrap_or(Value::Null);
        let timestamp = match object.remove("timestamp") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(parse_timestamp(&raw)?),
        };

        Ok(Inbound::Data(Envelope {
            topic,
            payload,
            timestamp,
        }))
    }
}

/// RFC 3339 string or integer epoch milliseconds
fn parse_timestamp(raw: &Value) -> Result<DateTime<Utc>, DecodeError> {
    match raw {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| DecodeError::InvalidTimestamp(format!("{}: {}", s, e))),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| DecodeError::InvalidTimestamp(n.to_string())),
        other => Err(DecodeError::InvalidTimestamp(other.to_string())),
    }
}
