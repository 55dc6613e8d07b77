//! TAS dashboard stream client
//!
//! ## Architecture
//!
//! - **livesocket**: the reconnecting, topic-multiplexed WebSocket client
//!   (re-exported from workspace)
//! - **bin_common**: shared utilities for binary executables (config path
//!   resolution, logging)
//!
//! ## Usage in Binaries
//!
//! ```rust
//! use tas_stream::bin_common::{init_tracing, load_config_from_env};
//! use tas_stream::livesocket::{ClientConfig, LiveClient};
//! ```

// Re-export workspace libraries for convenience
pub use livesocket;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables

    pub mod cli;
    pub mod logging;

    pub use cli::{load_config_from_env, parse_args, CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH};
    pub use logging::init_tracing;
}
