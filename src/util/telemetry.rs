//! Telemetry helpers for structured logging and tracing.

use tracing_subscriber::EnvFilter;

/// Default filter applied when `RUST_LOG` is not set.
pub const DEFAULT_LOG_DIRECTIVE: &str = "prometheus_reservations=info";

/// Initialize tracing. Users can install their own subscriber; this helper
/// installs a default env-based subscriber if none is set.
pub fn init_tracing() {
    init_tracing_with_default(DEFAULT_LOG_DIRECTIVE);
}

/// Same as [`init_tracing`] but with a caller-chosen fallback directive.
pub fn init_tracing_with_default(directive: &str) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
