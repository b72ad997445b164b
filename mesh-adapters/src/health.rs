//! Health check response returned by [`crate::KbAdapter::health`].

use serde::{Deserialize, Serialize};

/// Health state of an individual KB adapter connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterHealth {
    /// The KB is reachable and responding normally.
    Healthy,
    /// The KB is reachable but degraded (elevated latency, partial outage).
    Degraded,
    /// The KB is unreachable or erroring.
    Unhealthy,
}

/// Response returned by an adapter's health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall health state.
    pub status: AdapterHealth,
    /// Probe round-trip latency, when measured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    /// Human-readable detail, typically populated on degraded/unhealthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthResponse {
    /// Convenience constructor for a healthy response.
    #[must_use]
    pub fn healthy(latency_ms: f64) -> Self {
        Self {
            status: AdapterHealth::Healthy,
            latency_ms: Some(latency_ms),
            message: None,
        }
    }

    /// Convenience constructor for an unhealthy response.
    #[must_use]
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: AdapterHealth::Unhealthy,
            latency_ms: None,
            message: Some(message.into()),
        }
    }
}
