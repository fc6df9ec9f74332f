//! Structured logging with `tracing`.
//!
//! Log context (session ID, connection generation, item ID) travels as
//! span and event fields. The subscriber writes to stderr so stdout stays
//! free for renderers.

use tracing_subscriber::EnvFilter;

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install a compact human-readable subscriber on stderr.
///
/// `level` is a filter directive such as `"warn"` or `"tether_sync=debug"`;
/// `RUST_LOG` replaces it when set. Only the first install in a process
/// takes effect.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let _ = subscriber.try_init();
}

/// Install a JSON-lines subscriber on stderr.
///
/// Same precedence rules as [`init_subscriber`].
pub fn init_json_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .json();

    let _ = subscriber.try_init();
}
