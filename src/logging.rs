//! Diagnostic tracing for the `testgen` binary.
//!
//! Output goes to stderr so stdout stays clean for reports and `--json`
//! results.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter for a `-v` count: `warn`, `info`, then `debug`.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `verbosity`.
///
/// ```bash
/// RUST_LOG=testgen=debug testgen run --batch tasks.json
/// ```
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    // A second init (e.g. from tests) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
