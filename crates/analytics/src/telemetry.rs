//! Tracing initialization for the service binary.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` controls the filter; the
/// default keeps the service at `info` and quiets noisy HTTP internals.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
