#![warn(missing_docs, clippy::pedantic)]

//! Layered configuration loading for the `mesh` binary and its
//! constituent services.
//!
//! Sources are merged in ascending precedence: built-in defaults, an
//! optional config file, then environment variables prefixed
//! `AGENTMESH__` (double underscore as the section separator, e.g.
//! `AGENTMESH__BUS__URL`).

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use thiserror::Error;

const ENV_PREFIX: &str = "AGENTMESH";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The underlying `config` crate failed to build or deserialize.
    #[error(transparent)]
    Builder(#[from] BuilderError),
}

/// Root configuration for the `mesh` binary.
#[derive(Debug, Clone, Deserialize)]
pub struct MeshConfig {
    /// Message bus connection settings.
    pub bus: BusSection,
    /// Persistence store settings.
    pub store: StoreSection,
    /// Optional remote policy decision service.
    #[serde(default)]
    pub policy: PolicySection,
    /// Health monitor tuning.
    #[serde(default)]
    pub health: HealthSection,
    /// Structured logging settings.
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

/// NATS-compatible message bus settings (`spec.md` §4.1).
#[derive(Debug, Clone, Deserialize)]
pub struct BusSection {
    /// Broker connection URL, e.g. `nats://localhost:4222`.
    pub url: String,
    /// Default request-reply timeout, in milliseconds.
    #[serde(default = "default_bus_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl BusSection {
    /// Returns the configured request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_bus_timeout_ms() -> u64 {
    5_000
}

/// SQLite persistence store settings (`spec.md` §4.4).
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// Filesystem path to the SQLite database file.
    pub path: PathBuf,
}

/// Remote policy decision service settings (`spec.md` §4.2).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PolicySection {
    /// Base URL of the remote policy decision service, if configured.
    /// When absent, the local wildcard-rule evaluator is authoritative.
    #[serde(default)]
    pub decision_service_url: Option<String>,
    /// HTTP probe timeout, in milliseconds.
    #[serde(default = "default_policy_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl PolicySection {
    /// Returns the configured request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_policy_timeout_ms() -> u64 {
    5_000
}

/// Health monitor settings (`spec.md` §4.6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    /// Interval between background health sweeps, in seconds.
    pub interval_secs: u64,
    /// HTTP probe timeout, in milliseconds.
    pub probe_timeout_ms: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            probe_timeout_ms: 5_000,
        }
    }
}

impl HealthSection {
    /// Returns the configured sweep interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Returns the configured probe timeout as a [`Duration`].
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Logging/telemetry settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    /// `trace`, `debug`, `info`, `warn`, or `error`; falls back to the
    /// `RUST_LOG` environment variable when unset.
    pub log_level: String,
    /// Emit newline-delimited JSON log records instead of the default
    /// human-readable format.
    pub json: bool,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            json: false,
        }
    }
}

/// Explicit overrides layered on top of file/environment sources,
/// typically sourced from CLI flags.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Path to an additional config file to merge above the defaults.
    pub config_path: Option<PathBuf>,
    /// Overrides the bus URL.
    pub bus_url: Option<String>,
    /// Overrides the SQLite store path.
    pub store_path: Option<PathBuf>,
}

/// Loads [`MeshConfig`] from built-in defaults, an optional config
/// file, environment variables, and explicit overrides, in ascending
/// precedence.
///
/// # Errors
///
/// Returns [`ConfigError`] if a source cannot be read or the merged
/// configuration fails to deserialize into [`MeshConfig`].
pub fn load(overrides: ConfigOverrides) -> Result<MeshConfig, ConfigError> {
    let mut builder = Config::builder()
        .set_default("bus.request_timeout_ms", default_bus_timeout_ms() as i64)?
        .set_default("store.path", "agentmesh.sqlite3")?
        .set_default("health.interval_secs", 30)?
        .set_default("health.probe_timeout_ms", 5_000)?
        .set_default("telemetry.log_level", "info")?
        .set_default("telemetry.json", false)?;

    if let Some(path) = &overrides.config_path {
        builder = builder.add_source(File::from(path.as_path()));
    } else {
        builder = builder.add_source(File::with_name("agentmesh").required(false));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    if let Some(url) = overrides.bus_url {
        builder = builder.set_override("bus.url", url)?;
    }
    if let Some(path) = overrides.store_path {
        builder = builder.set_override("store.path", path.to_string_lossy().into_owned())?;
    }

    let built = builder.build()?;
    Ok(built.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_with_overrides_and_no_file() {
        let config = load(ConfigOverrides {
            config_path: None,
            bus_url: Some("nats://localhost:4222".into()),
            store_path: Some(PathBuf::from("/tmp/does-not-matter.sqlite3")),
        })
        .expect("config loads purely from defaults + overrides");

        assert_eq!(config.bus.url, "nats://localhost:4222");
        assert_eq!(config.health.interval_secs, 30);
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn file_source_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [bus]
            url = "nats://bus.internal:4222"
            request_timeout_ms = 2500

            [store]
            path = "/var/lib/agentmesh/store.sqlite3"

            [health]
            interval_secs = 10
            probe_timeout_ms = 1000
            "#
        )
        .unwrap();

        let config = load(ConfigOverrides {
            config_path: Some(file.path().to_path_buf()),
            bus_url: None,
            store_path: None,
        })
        .expect("config loads from file");

        assert_eq!(config.bus.url, "nats://bus.internal:4222");
        assert_eq!(config.bus.request_timeout_ms, 2500);
        assert_eq!(config.health.interval_secs, 10);
    }
}
