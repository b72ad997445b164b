#![warn(missing_docs, clippy::pedantic)]

//! Structured logging setup for the `mesh` binary.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Initializes the global `tracing` subscriber.
///
/// `log_level` seeds the default filter directive (e.g. `info`,
/// `agentmesh=debug`); the `RUST_LOG` environment variable, when set,
/// takes precedence. When `json` is `true`, log records are emitted as
/// newline-delimited JSON instead of the human-readable format.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed.
pub fn init(log_level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))?;
    } else {
        fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))?;
    }

    Ok(())
}
