//! Minimal HTTP GET probe used for agent `health_endpoint` checks.
//!
//! Reuses the hyper + rustls client construction already established in
//! `mesh-policy::http` and `agent-adapters::http_client`; this crate keeps
//! its own copy rather than depending on `mesh-policy` for a single GET.

use std::sync::Arc;
use std::time::Duration;

use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use webpki_roots::TLS_SERVER_ROOTS;

type HyperClient = Client<HttpsConnector<HttpConnector>, Body>;

fn build_https_client() -> HyperClient {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));
    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    let connector = HttpsConnector::from((http, Arc::new(config)));
    Client::builder().build::<_, Body>(connector)
}

/// Outcome of a single HTTP health probe.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    /// The endpoint responded with the given status code and latency.
    Responded {
        /// HTTP status code.
        status: u16,
        /// Round-trip latency, in milliseconds.
        latency_ms: f64,
    },
    /// The probe did not complete within the configured timeout.
    Timeout,
    /// The request failed before a response was received.
    Error(String),
}

/// Probe to a client for reuse across probe calls.
#[derive(Clone)]
pub struct HttpProbe {
    client: HyperClient,
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self {
            client: build_https_client(),
        }
    }
}

impl HttpProbe {
    /// Creates a new probe client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a `GET {url}` with the given timeout.
    pub async fn get(&self, url: &str, timeout: Duration) -> ProbeOutcome {
        let request = match Request::builder().method(Method::GET).uri(url).body(Body::empty()) {
            Ok(request) => request,
            Err(err) => return ProbeOutcome::Error(err.to_string()),
        };

        let start = std::time::Instant::now();
        match tokio::time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => ProbeOutcome::Responded {
                status: response.status().as_u16(),
                latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            },
            Ok(Err(err)) => ProbeOutcome::Error(err.to_string()),
            Err(_) => ProbeOutcome::Timeout,
        }
    }
}
