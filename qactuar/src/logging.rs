//! Tracing initialization.
//!
//! The default level comes from the config's `LOG_LEVEL`; the `LOGS` map
//! contributes per-target directives (for example `"qactuar::access":
//! "info"`). A `RUST_LOG` environment variable overrides both.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Initialize the tracing subscriber once at startup, before the server
/// is built.
pub fn init_logging(config: &Config) {
    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_ascii_lowercase()));
    for (target, level) in &config.logs {
        if let Ok(directive) = format!("{target}={}", level.to_ascii_lowercase()).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
