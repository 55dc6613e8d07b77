//! CLI utilities for binaries
//!
//! Handles configuration path resolution and command line arguments.

use std::path::PathBuf;

/// Environment variable naming the stream config file
pub const CONFIG_ENV_VAR: &str = "TAS_STREAM_CONFIG";

/// Used when [`CONFIG_ENV_VAR`] is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/stream_config.yaml";

/// Load configuration path from environment or use default
///
/// # Examples
/// ```
/// use tas_stream::bin_common::load_config_from_env;
///
/// let path = load_config_from_env();
/// ```
pub fn load_config_from_env() -> PathBuf {
    std::env::var(CONFIG_ENV_VAR)
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
        .into()
}

/// Parse command line arguments for a binary
///
/// Returns a vector of arguments (excluding the program name)
pub fn parse_args() -> Vec<String> {
    std::env::args().skip(1).collect()
}
