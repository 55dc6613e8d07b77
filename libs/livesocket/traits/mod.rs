//! # LiveSocket Traits
//!
//! Seams used throughout the client:
//!
//! - **Connector / Connection**: the physical transport, swappable for tests
//! - **ReconnectionStrategy**: how long to wait before the next attempt
//! - **LiveSocketError / DecodeError**: the error taxonomy

pub mod error;
pub mod reconnect;
pub mod transport;

pub use error::{DecodeError, LiveSocketError, Result};
pub use reconnect::{ExponentialBackoff, ReconnectionStrategy};
pub use transport::{Connection, Connector, WsMessage};
