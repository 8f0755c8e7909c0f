//! Tracing subscriber setup for binaries built on this crate.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::{RagError, Result};

/// Environment variable selecting the log format (`json` or `text`).
pub const LOG_FORMAT_VAR: &str = "KBRAG_LOG_FORMAT";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `default_filter` (e.g. `"info,kb_rag=debug"`).
/// Setting `KBRAG_LOG_FORMAT=json` emits one JSON object per event instead
/// of human-readable lines. Logs go to stderr so command output stays clean.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] if a global subscriber is already set.
pub fn init_tracing(default_filter: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let json = std::env::var(LOG_FORMAT_VAR).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).try_init()
    } else {
        let layer = fmt::layer().with_target(false).compact().with_writer(std::io::stderr);
        registry.with(layer).try_init()
    };

    result.map_err(|e| RagError::ConfigError(format!("failed to init tracing: {e}")))
}
