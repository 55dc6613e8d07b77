//! Stream client binary
//!
//! Connects to the dashboard WebSocket, subscribes to the given topics and
//! logs every payload and connection state change. Once the reconnect budget
//! (`max_attempts`) is spent the client stays disconnected and the binary
//! exits with an error; set `max_attempts: null` to retry forever.
//!
//! Usage:
//!   cargo run --bin tas_stream -- kline:BTCUSDT books15:ETHUSDT
//!
//! Environment variables:
//!   TAS_STREAM_CONFIG - config file (default: config/stream_config.yaml)
//!   TAS_WS_URL        - overrides endpoint_url
//!   RUST_LOG          - overrides log_level

use anyhow::{bail, Context, Result};
use std::time::Duration;
use tas_stream::bin_common::{init_tracing, load_config_from_env, parse_args};
use tas_stream::livesocket::{topics, ClientConfig, ClientEvent, LiveClient};
use tracing::{error, info, warn};

const STATS_INTERVAL: Duration = Duration::from_secs(60);
const EVENT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenv::dotenv().ok();

    let config_path = load_config_from_env();
    let config = ClientConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    init_tracing(&config.log_level);
    config.log();

    let mut topic_args = parse_args();
    if topic_args.is_empty() {
        topic_args.push(topics::kline("BTCUSDT"));
    }

    let client = LiveClient::new(config)?;

    for topic in &topic_args {
        let mut rx = client.subscribe(topic).subscribe();
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                info!(topic = %rx.topic(), %payload, "Payload");
            }
            info!(topic = %rx.topic(), "Stream ended");
        });
    }

    let mut state = client.watch_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            info!(state = %current, "Connection state");
        }
    });

    client.connect();

    info!("");
    info!("========================================");
    info!("Streaming {} topic(s)", topic_args.len());
    info!("Press Ctrl+C to stop");
    info!("========================================");

    let mut stats = tokio::time::interval(STATS_INTERVAL);
    stats.tick().await;
    let mut events = tokio::time::interval(EVENT_POLL_INTERVAL);

    let exhausted = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break None,
            _ = stats.tick() => {
                let metrics = client.metrics();
                info!(
                    sent = metrics.messages_sent,
                    received = metrics.messages_received,
                    decode_errors = metrics.decode_errors,
                    dropped = metrics.dropped_envelopes,
                    reconnects = metrics.reconnect_count,
                    "Stream stats"
                );
            }
            _ = events.tick() => {
                let spent = std::iter::from_fn(|| client.try_recv_event())
                    .find_map(|event| match event {
                        ClientEvent::ReconnectExhausted { attempts } => Some(attempts),
                        _ => None,
                    });
                if spent.is_some() {
                    break spent;
                }
            }
        }
    };

    if exhausted.is_none() {
        warn!("Shutdown requested");
    }
    client.shutdown().await?;
    info!("Shutdown complete");

    if let Some(attempts) = exhausted {
        error!(attempts, "Reconnect budget exhausted");
        bail!("gave up after {} reconnect attempts", attempts);
    }
    Ok(())
}
