//! Tracing setup for the vault engine.
//!
//! Console-only structured logging. The level comes from `RUST_LOG` when
//! set, otherwise from the configured level; the format is either
//! human-readable or JSON lines.
//!
//! # Usage
//!
//! ```rust,ignore
//! use vault_engine::config::LoggingConfig;
//! use vault_engine::telemetry::init_telemetry;
//!
//! fn main() {
//!     init_telemetry(&LoggingConfig::default());
//!     // ... application code
//! }
//! ```

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Initialize console tracing from the logging configuration.
///
/// Safe to call once per process; a second call is a no-op so tests that
/// each set up logging do not panic.
pub fn init_telemetry(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let result = if config.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .try_init()
    };

    if result.is_ok() {
        tracing::debug!(
            level = %config.level,
            format = %config.format,
            "tracing initialized"
        );
    }
}
