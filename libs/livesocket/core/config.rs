use crate::heartbeat::KeepAlivePolicy;
use crate::reconnect::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Environment variable overriding `endpoint_url`
pub const ENDPOINT_ENV_VAR: &str = "TAS_WS_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Transport client configuration
///
/// Supplied at construction and never mutated by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket URL (ws:// or wss://)
    pub endpoint_url: String,

    /// When false, `connect()` only logs a warning
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Delay before the first reconnect
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Growth factor applied per attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for a single backoff delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Reconnect attempts before giving up (None = unlimited)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,

    /// Time between ping probes
    #[serde(default = "default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,

    /// Force a reconnect when a ping stays unanswered this long
    /// (None = fire-and-forget probing)
    #[serde(default)]
    pub pong_timeout_ms: Option<u64>,

    /// Bound on the opaque connect step
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-topic multicast buffer; consumers further behind skip payloads
    #[serde(default = "default_stream_capacity")]
    pub stream_capacity: usize,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> Option<u32> {
    Some(10)
}

fn default_keep_alive_interval_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_stream_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ClientConfig {
    /// Configuration with default policy for the given endpoint
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            enabled: default_enabled(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            keep_alive_interval_ms: default_keep_alive_interval_ms(),
            pong_timeout_ms: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            stream_capacity: default_stream_capacity(),
            log_level: default_log_level(),
        }
    }

    /// Load configuration from a YAML file, apply the environment override
    /// and validate
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        let mut config = Self::from_yaml_str(&yaml_content)?;

        if let Ok(url) = std::env::var(ENDPOINT_ENV_VAR) {
            info!("Overriding endpoint URL from {}", ENDPOINT_ENV_VAR);
            config.endpoint_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without touching the environment or validating
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn with_backoff(
        mut self,
        base_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        max_attempts: Option<u32>,
    ) -> Self {
        self.base_delay_ms = base_delay.as_millis() as u64;
        self.backoff_multiplier = multiplier;
        self.max_delay_ms = max_delay.as_millis() as u64;
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_keep_alive(mut self, interval: Duration, pong_timeout: Option<Duration>) -> Self {
        self.keep_alive_interval_ms = interval.as_millis() as u64;
        self.pong_timeout_ms = pong_timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.endpoint_url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::ValidationError(format!(
                "endpoint_url must start with ws:// or wss://, got '{}'",
                self.endpoint_url
            )));
        }

        if self.base_delay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "base_delay_ms must be greater than 0".to_string(),
            ));
        }

        if !(self.backoff_multiplier >= 1.0) {
            return Err(ConfigError::ValidationError(
                "backoff_multiplier must be at least 1.0".to_string(),
            ));
        }

        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::ValidationError(
                "max_delay_ms must not be smaller than base_delay_ms".to_string(),
            ));
        }

        if self.keep_alive_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "keep_alive_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.pong_timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError(
                "pong_timeout_ms must be greater than 0 when set".to_string(),
            ));
        }

        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.stream_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "stream_capacity must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "log_level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.base_delay_ms),
            self.backoff_multiplier,
            Duration::from_millis(self.max_delay_ms),
            self.max_attempts,
        )
    }

    pub fn keep_alive_policy(&self) -> KeepAlivePolicy {
        KeepAlivePolicy {
            interval: Duration::from_millis(self.keep_alive_interval_ms),
            pong_timeout: self.pong_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Log configuration summary
    pub fn log(&self) {
        info!("Stream configuration loaded:");
        info!("  Endpoint: {}", self.endpoint_url);
        info!("  Enabled: {}", self.enabled);
        info!(
            "  Backoff: {}ms x{} up to {}ms, attempts: {}",
            self.base_delay_ms,
            self.backoff_multiplier,
            self.max_delay_ms,
            self.max_attempts
                .map_or_else(|| "unlimited".to_string(), |n| n.to_string())
        );
        info!(
            "  Keep-alive: every {}ms, pong timeout: {}",
            self.keep_alive_interval_ms,
            self.pong_timeout_ms
                .map_or_else(|| "none".to_string(), |ms| format!("{}ms", ms))
        );
        info!("  Log level: {}", self.log_level);
    }
}
