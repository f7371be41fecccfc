//! Tracing subscriber setup for embedding applications.

use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber filtered by `RUST_LOG`, defaulting to
/// `info` for this crate.
///
/// Call once at startup; later calls are ignored so tests can invoke it
/// freely.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("foreman=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
