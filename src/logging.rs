//! logging
//!
//! Structured logging setup via `tracing`.
//!
//! `--debug` only raises verbosity; it never changes what gets redacted.
//! Secrets ([`crate::core::config::Secret`]) already refuse to print their
//! contents via `Debug`/`Display`, so nothing here needs to scrub log lines
//! itself — as long as call sites log the wrapper, not `.expose()`.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. Call exactly once, from `main`,
/// after [`crate::core::config::Config::resolve`] has decided `debug`.
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
