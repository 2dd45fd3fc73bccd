//! Tracing setup for the foreman binary.
//!
//! Diagnostics go to stderr and are controlled by `RUST_LOG`; human-facing
//! command output stays on stdout via the `console` styling in `cmd/`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `info` for this crate. `verbose` lowers
/// the default to `debug`.
pub fn init(verbose: bool) {
    let default = if verbose {
        "foreman=debug"
    } else {
        "foreman=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
