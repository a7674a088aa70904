//! Tracing subscriber setup.
//!
//! The runtime only emits `tracing` events; installing a subscriber is left
//! to the application. These helpers cover the common case.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_DIRECTIVE: &str = "resource_runtime=info";

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_DIRECTIVE`]. Does nothing if a global subscriber exists.
pub fn init_tracing() {
    init_tracing_with(DEFAULT_DIRECTIVE);
}

/// As [`init_tracing`], with `fallback` as the filter when `RUST_LOG` is
/// unset. Worker and timer threads are named, so thread names are logged.
pub fn init_tracing_with(fallback: &str) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
