//! Logging setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// The filter honors `RUST_LOG`; `default_level` applies when the variable
/// is unset (e.g. `"wiretap=info"`). Safe to call more than once; later
/// calls are no-ops.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
