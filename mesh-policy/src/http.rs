//! HTTP policy decision client.
//!
//! Talks the same convention as the original Python decision client: a
//! `POST {url}/v1/data/agentmesh/decision` carrying `{"input": {...}}`, a
//! `GET {url}/health` liveness probe, and a `/v1/policies[/{name}]`
//! surface for operational tooling (list, upload, delete, fetch content).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use webpki_roots::TLS_SERVER_ROOTS;

use crate::client::PolicyDecisionClient;
use crate::contracts::PolicyRequest;
use crate::decision::PolicyDecision;
use crate::error::{Error, Result};

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

/// Policy decision client backed by an HTTP(S) decision service.
pub struct HttpPolicyClient {
    url: String,
    timeout: Duration,
    client: HyperClient,
    policy_dir: Option<PathBuf>,
}

impl HttpPolicyClient {
    /// Creates a client targeting the given decision service base URL.
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            client: build_https_client(),
            policy_dir: None,
        }
    }

    /// Enables local persistence of uploaded policy text under `dir`.
    ///
    /// Mirrors the original client's treatment of on-disk policy text as a
    /// side concern: the remote service remains the source of truth.
    #[must_use]
    pub fn with_policy_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.policy_dir = Some(dir.into());
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), path)
    }

    async fn send(&self, method: Method, path: &str, body: Body) -> Result<(u16, Vec<u8>)> {
        let request = Request::builder()
            .method(method)
            .uri(self.endpoint(path))
            .header("content-type", "application/json")
            .body(body)
            .map_err(|err| Error::Transport(err.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|err| Error::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        let bytes = tokio::time::timeout(
            self.timeout,
            hyper::body::to_bytes(response.into_body()),
        )
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(|err| Error::Transport(err.to_string()))?;

        Ok((status, bytes.to_vec()))
    }
}

#[async_trait]
impl PolicyDecisionClient for HttpPolicyClient {
    async fn evaluate(&self, request: &PolicyRequest) -> PolicyDecision {
        let mut input = json!({
            "principal_type": request.principal_type(),
            "principal_id": request.principal_id(),
            "resource_type": request.resource_type(),
            "resource_id": request.resource_id(),
            "action": request.action(),
        });
        if let Some(context) = request.context() {
            input["context"] = context.clone();
        }
        let body = Body::from(json!({ "input": input }).to_string());

        match self
            .send(Method::POST, "/v1/data/agentmesh/decision", body)
            .await
        {
            Ok((status, bytes)) if (200..300).contains(&status) => {
                match serde_json::from_slice::<Value>(&bytes) {
                    Ok(payload) => decode_decision(&payload),
                    Err(err) => {
                        warn!(error = %err, "policy service returned malformed response, defaulting to deny");
                        PolicyDecision::deny(format!(
                            "policy evaluation error: malformed response ({err})"
                        ))
                    }
                }
            }
            Ok((status, bytes)) => {
                let body = String::from_utf8_lossy(&bytes);
                warn!(status, %body, "policy service returned error status, defaulting to deny");
                PolicyDecision::deny(format!("policy evaluation failed: status {status}"))
            }
            Err(Error::Timeout) => {
                warn!(
                    timeout_ms = self.timeout.as_millis(),
                    "policy evaluation timed out, defaulting to deny"
                );
                PolicyDecision::deny("policy evaluation timed out (default deny)")
            }
            Err(err) => {
                warn!(error = %err, "policy evaluation failed, defaulting to deny");
                PolicyDecision::deny(format!("policy evaluation error: {err}"))
            }
        }
    }

    async fn health(&self) -> bool {
        match self.send(Method::GET, "/health", Body::empty()).await {
            Ok((status, _)) => status == 200,
            Err(err) => {
                debug!(error = %err, "policy service health check failed");
                false
            }
        }
    }

    async fn list_policies(&self) -> Result<Vec<String>> {
        let (status, bytes) = self.send(Method::GET, "/v1/policies", Body::empty()).await?;
        if !(200..300).contains(&status) {
            return Err(Error::Status {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        let payload: Value = serde_json::from_slice(&bytes)?;
        Ok(policy_names(&payload))
    }

    async fn upload_policy(&self, name: &str, content: &str) -> Result<()> {
        let path = format!("/v1/policies/{name}");
        let (status, bytes) = self
            .send(Method::PUT, &path, Body::from(content.to_owned()))
            .await?;
        if !(200..300).contains(&status) {
            return Err(Error::Status {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        if let Some(dir) = &self.policy_dir {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(dir.join(name), content).await?;
        }
        Ok(())
    }

    async fn delete_policy(&self, name: &str) -> Result<()> {
        let path = format!("/v1/policies/{name}");
        let (status, bytes) = self.send(Method::DELETE, &path, Body::empty()).await?;
        if !(200..300).contains(&status) {
            return Err(Error::Status {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        if let Some(dir) = &self.policy_dir {
            let _ = tokio::fs::remove_file(dir.join(name)).await;
        }
        Ok(())
    }

    async fn get_policy_content(&self, name: &str) -> Result<String> {
        let path = format!("/v1/policies/{name}");
        let (status, bytes) = self.send(Method::GET, &path, Body::empty()).await?;
        if !(200..300).contains(&status) {
            return Err(Error::Status {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[derive(Deserialize, Default)]
struct DecisionEnvelope {
    #[serde(default)]
    result: DecisionBody,
}

#[derive(Deserialize, Default)]
struct DecisionBody {
    #[serde(default)]
    allow: bool,
    #[serde(default)]
    masking_rules: Vec<String>,
    #[serde(default)]
    reason: String,
}

fn decode_decision(payload: &Value) -> PolicyDecision {
    match serde_json::from_value::<DecisionEnvelope>(payload.clone()) {
        Ok(envelope) if envelope.result.allow => {
            PolicyDecision::allow(envelope.result.masking_rules, envelope.result.reason)
        }
        Ok(envelope) => PolicyDecision::deny(if envelope.result.reason.is_empty() {
            "denied by policy".to_owned()
        } else {
            envelope.result.reason
        }),
        Err(err) => {
            PolicyDecision::deny(format!("policy evaluation error: malformed decision ({err})"))
        }
    }
}

fn policy_names(payload: &Value) -> Vec<String> {
    match payload.get("result") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("id").and_then(Value::as_str).map(str::to_owned))
            .collect(),
        Some(Value::Object(map)) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_allow_decision() {
        let payload = json!({
            "result": {"allow": true, "masking_rules": ["ssn"], "reason": "policy-1"}
        });
        let decision = decode_decision(&payload);
        assert!(decision.is_allow());
        assert_eq!(decision.masking_rules(), ["ssn"]);
    }

    #[test]
    fn decodes_deny_decision_with_default_reason() {
        let payload = json!({"result": {"allow": false}});
        let decision = decode_decision(&payload);
        assert!(decision.is_deny());
        assert_eq!(decision.reason(), "denied by policy");
    }

    #[test]
    fn malformed_payload_defaults_to_deny() {
        let decision = decode_decision(&json!("not an object"));
        assert!(decision.is_deny());
    }

    #[test]
    fn extracts_policy_names_from_array_and_object() {
        let array = json!({"result": [{"id": "p1"}, {"id": "p2"}]});
        assert_eq!(policy_names(&array), vec!["p1", "p2"]);

        let object = json!({"result": {"p1": {}, "p2": {}}});
        let mut names = policy_names(&object);
        names.sort();
        assert_eq!(names, vec!["p1", "p2"]);
    }

    #[test]
    fn endpoint_joins_base_url_and_path() {
        let client = HttpPolicyClient::new("http://localhost:8181/", Duration::from_secs(1));
        assert_eq!(
            client.endpoint("/v1/policies"),
            "http://localhost:8181/v1/policies"
        );
    }
}
