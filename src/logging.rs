//! Log setup for when the crate runs inside a host that doesn't install its own subscriber

use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Installs a formatting subscriber. `RUST_LOG` overrides `default_filter`.
///
/// Returns `false` if a global subscriber was already installed, which is left in place.
pub fn init(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// [`init`] with the config's `log_filter`
pub fn init_from(config: &Config) -> bool {
    init(&config.log_filter)
}
