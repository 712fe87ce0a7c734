//! Tracing setup for test binaries
//!
//! Tests share one process, so initialization must tolerate being called
//! once per test function.

use tracing_subscriber::EnvFilter;

/// Initialize tracing with the given default level.
///
/// `RUST_LOG` takes precedence over `default_level`. Repeated calls are
/// no-ops, so every test can call this without coordination.
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
