//! Logging setup.
//!
//! Logs always go to stderr: stdout carries the NDJSON page link when the
//! relay runs as a stdio host.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `default_filter` (e.g. `"keyward_relay=info"`).
/// Calling this twice keeps the first subscriber.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    // An Err means a subscriber is already installed.
    let _ = if log_json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    };
}
