//! Telemetry helpers for structured logging.

use tracing_subscriber::EnvFilter;

/// Install a default env-filtered fmt subscriber unless one is already set.
///
/// Library code never calls this; hosts and tests opt in.
pub fn init_tracing() {
    init_tracing_with("info");
}

/// Like [`init_tracing`], falling back to `default_filter` when `RUST_LOG`
/// is unset.
pub fn init_tracing_with(default_filter: &str) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
