//! Tracing subscriber initialization.
//!
//! Library crates only emit `tracing` events; installing a subscriber is the
//! embedding application's call. These helpers cover the common case and are
//! safe to call more than once.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
pub fn init() {
    init_with_filter("info");
}

/// Install a fmt subscriber with the given default filter directive.
///
/// `RUST_LOG` still takes precedence when set. Repeated calls are no-ops.
pub fn init_with_filter(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
