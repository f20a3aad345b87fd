//! Tracing subscriber setup for binaries and integration tests.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the log filter, in `EnvFilter` syntax.
pub const LOG_ENV: &str = "MAGPIE_LOG";

/// Install a global `fmt` subscriber filtered by `MAGPIE_LOG`.
///
/// Falls back to `default_directive` (for example `"magpie_core=info"`) when
/// the variable is unset or invalid. Returns `false` if a global subscriber
/// was already installed.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .is_ok()
}
