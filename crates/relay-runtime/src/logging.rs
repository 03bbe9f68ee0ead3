//! Tracing bootstrap for embedders
//!
//! The runtime only emits `tracing` events. Embedders that don't install
//! their own subscriber can call [`init`] or [`init_from_config`].

use relay_config::Config;
use tracing_subscriber::EnvFilter;

/// Environment variable read by [`init_from_env`]
pub const LOG_ENV: &str = "RELAY_LOG";

/// Install a compact stderr subscriber using an `EnvFilter` directive.
///
/// Returns `false` if the directive is invalid or a global subscriber is
/// already installed.
pub fn init(filter: &str) -> bool {
    let filter = match EnvFilter::try_new(filter) {
        Ok(filter) => filter,
        Err(_) => return false,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// Install a subscriber using the configured `[logging] filter`
pub fn init_from_config(config: &Config) -> bool {
    init(config.log_filter())
}

/// Install a subscriber if `RELAY_LOG` is set
pub fn init_from_env() -> bool {
    match std::env::var(LOG_ENV) {
        Ok(filter) => init(&filter),
        Err(_) => false,
    }
}
