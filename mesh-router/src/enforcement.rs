//! Policy evaluation, KB dispatch, and response masking.
//!
//! Grounded on `examples/original_source/services/enforcement/enforcement_service.py`'s
//! `EnforcementService`: `enforce_kb_access` and `enforce_agent_invoke`
//! are the two governed entry points every mediated call passes
//! through. Unlike the original, operation dispatch does not remap
//! Python-style keyword arguments per operation name — this repo's
//! `mesh-adapters` operations each accept a single JSON `params` value
//! directly, so the params object is forwarded to the adapter unchanged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use mesh_adapters::KbAdapter;
use mesh_policy::{PolicyDecisionClient, PolicyRequest};
use mesh_store::{AuditEvent, AuditEventType, AuditOutcome, Store};
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::error::{Error, Result};
use crate::masking::apply_masking;

/// Outcome of a successful [`EnforcementPipeline::enforce_kb_access`] call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct KbAccessOutcome {
    /// Masked result data.
    pub data: Value,
    /// Field names that were redacted.
    pub masked_fields: Vec<String>,
    /// Human-readable reason the policy decision gave.
    pub policy: String,
}

/// Outcome of a successful [`EnforcementPipeline::enforce_agent_invoke`] call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InvokeAuthorization {
    /// Human-readable reason the policy decision gave.
    pub policy: String,
}

/// The governance layer every mediated KB query or agent invocation
/// passes through: policy evaluation, KB execution, response masking,
/// and audit logging.
pub struct EnforcementPipeline {
    store: Arc<Store>,
    policy: Arc<dyn PolicyDecisionClient>,
    adapters: HashMap<String, Arc<dyn KbAdapter>>,
}

impl EnforcementPipeline {
    /// Creates a new pipeline. `adapters` maps `kb_type` to the adapter
    /// instance dispatched to for that type.
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        policy: Arc<dyn PolicyDecisionClient>,
        adapters: HashMap<String, Arc<dyn KbAdapter>>,
    ) -> Self {
        Self { store, policy, adapters }
    }

    /// Enforces governed access to a knowledge base.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KbNotFound`] if the KB is unregistered,
    /// [`Error::AccessDenied`] if policy denies the request,
    /// [`Error::UnsupportedKbType`] if no adapter is registered for the
    /// KB's type, or propagates adapter/store failures (each logged as
    /// an `error` audit event before being surfaced).
    pub async fn enforce_kb_access(
        &self,
        requester_id: &str,
        kb_id: &str,
        operation: &str,
        params: Value,
    ) -> Result<KbAccessOutcome> {
        let start = Instant::now();

        let kb_record = match self.store.get_kb(kb_id).await? {
            Some(record) => record,
            None => {
                self.log_denied_access(requester_id, kb_id, operation, "KB not found").await;
                return Err(Error::KbNotFound { kb_id: kb_id.to_owned() });
            }
        };

        let request = PolicyRequest::new("agent", requester_id, "kb", kb_id, operation)
            .with_context(json!({"kb_type": kb_record.kb_type}));
        let decision = self.policy.evaluate(&request).await;

        if decision.is_deny() {
            self.log_denied_access(requester_id, kb_id, operation, decision.reason()).await;
            return Err(Error::AccessDenied {
                reason: format!(
                    "{} (principal={requester_id}, resource={kb_id}, action={operation})",
                    decision.reason()
                ),
            });
        }

        let adapter = self.adapters.get(&kb_record.kb_type).ok_or_else(|| {
            Error::UnsupportedKbType { kb_type: kb_record.kb_type.clone() }
        })?;

        let raw_response = match adapter.execute(operation, params).await {
            Ok(response) => response,
            Err(err) => {
                error!(requester_id, kb_id, %err, "enforcement failed executing KB operation");
                self.log_error(requester_id, Some(kb_id), operation, &err.to_string()).await;
                return Err(Error::Adapter(err));
            }
        };

        let masking_rules = decision.masking_rules().to_vec();
        let masked_response = apply_masking(&raw_response, &masking_rules);

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.log_successful_access(requester_id, kb_id, operation, &masking_rules, latency_ms).await;

        Ok(KbAccessOutcome {
            data: masked_response,
            masked_fields: masking_rules,
            policy: decision.reason().to_owned(),
        })
    }

    /// Enforces governed authorization for an agent-to-agent invocation.
    ///
    /// Returns authorization only; the router handles tracking and
    /// dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccessDenied`] if policy denies the invocation,
    /// or propagates store failures from audit logging.
    pub async fn enforce_agent_invoke(
        &self,
        source_agent_id: &str,
        target_agent_id: &str,
        operation: &str,
    ) -> Result<InvokeAuthorization> {
        let request =
            PolicyRequest::new("agent", source_agent_id, "agent", target_agent_id, "invoke")
                .with_context(json!({"operation": operation}));
        let decision = self.policy.evaluate(&request).await;

        if decision.is_deny() {
            self.log_denied_invoke(source_agent_id, target_agent_id, operation, decision.reason())
                .await;
            return Err(Error::AccessDenied {
                reason: format!(
                    "{} (source={source_agent_id}, target={target_agent_id})",
                    decision.reason()
                ),
            });
        }

        if let Err(err) = self
            .store
            .log_event(AuditEvent {
                event_type: AuditEventType::Invoke,
                source_id: source_agent_id.to_owned(),
                target_id: Some(target_agent_id.to_owned()),
                outcome: AuditOutcome::Success,
                timestamp: Utc::now(),
                request_metadata: Some(json!({"operation": operation, "authorization": "granted"})),
                policy_decision: None,
                masked_fields: None,
                full_request: None,
                full_response: None,
                provenance_chain: None,
            })
            .await
        {
            warn!(%err, "failed to log invocation authorization audit event");
        }

        Ok(InvokeAuthorization { policy: decision.reason().to_owned() })
    }

    async fn log_denied_access(&self, requester_id: &str, kb_id: &str, operation: &str, reason: &str) {
        self.log_event(
            AuditEventType::Query,
            requester_id,
            Some(kb_id),
            AuditOutcome::Denied,
            json!({"operation": operation, "reason": reason}),
            None,
        )
        .await;
    }

    async fn log_successful_access(
        &self,
        requester_id: &str,
        kb_id: &str,
        operation: &str,
        masked_fields: &[String],
        latency_ms: f64,
    ) {
        self.log_event(
            AuditEventType::Query,
            requester_id,
            Some(kb_id),
            AuditOutcome::Success,
            json!({"operation": operation, "latency_ms": latency_ms}),
            Some(masked_fields.to_vec()),
        )
        .await;
    }

    async fn log_denied_invoke(&self, source_id: &str, target_id: &str, operation: &str, reason: &str) {
        self.log_event(
            AuditEventType::Invoke,
            source_id,
            Some(target_id),
            AuditOutcome::Denied,
            json!({"operation": operation, "reason": reason}),
            None,
        )
        .await;
    }

    async fn log_error(&self, source_id: &str, target_id: Option<&str>, operation: &str, error: &str) {
        self.log_event(
            AuditEventType::Query,
            source_id,
            target_id,
            AuditOutcome::Error,
            json!({"operation": operation, "error": error}),
            None,
        )
        .await;
    }

    async fn log_event(
        &self,
        event_type: AuditEventType,
        source_id: &str,
        target_id: Option<&str>,
        outcome: AuditOutcome,
        request_metadata: Value,
        masked_fields: Option<Vec<String>>,
    ) {
        let event = AuditEvent {
            event_type,
            source_id: source_id.to_owned(),
            target_id: target_id.map(ToOwned::to_owned),
            outcome,
            timestamp: Utc::now(),
            request_metadata: Some(request_metadata),
            policy_decision: None,
            masked_fields,
            full_request: None,
            full_response: None,
            provenance_chain: None,
        };
        if let Err(err) = self.store.log_event(event).await {
            warn!(%err, "failed to log audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_policy::LocalPolicyClient;
    use mesh_store::{KbRegistration, PolicyDefinition, PolicyEffect, PolicyRule};

    fn relational_adapters() -> HashMap<String, Arc<dyn KbAdapter>> {
        let mut map: HashMap<String, Arc<dyn KbAdapter>> = HashMap::new();
        map.insert(
            "relational".into(),
            Arc::new(mesh_adapters::RelationalKbAdapter::new("customer-db")),
        );
        map
    }

    async fn store_with_kb_and_policy(effect: PolicyEffect) -> Arc<Store> {
        let store = Store::open_in_memory().await.unwrap();
        store
            .register_kb(KbRegistration {
                kb_id: "customer-db".into(),
                kb_type: "relational".into(),
                endpoint: "postgres://localhost/db".into(),
                operations: vec!["sql_query".into(), "insert".into()],
                kb_schema: json!({}),
                health_endpoint: None,
                metadata: json!({}),
            })
            .await
            .unwrap();
        store
            .create_policy(PolicyDefinition {
                policy_name: "allow-sales".into(),
                rules: vec![PolicyRule {
                    principal: "agent:sales-*".into(),
                    resource: "kb:customer-*".into(),
                    action: "sql_query".into(),
                    effect,
                    masking_rules: vec!["ssn".into()],
                }],
                precedence: 0,
                active: true,
                metadata: json!({}),
            })
            .await
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn denies_when_kb_missing() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let policy = Arc::new(LocalPolicyClient::new(Arc::clone(&store)));
        let pipeline = EnforcementPipeline::new(store, policy, relational_adapters());
        let err = pipeline
            .enforce_kb_access("sales-1", "customer-db", "sql_query", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KbNotFound { .. }));
    }

    #[tokio::test]
    async fn denies_when_policy_denies() {
        let store = store_with_kb_and_policy(PolicyEffect::Deny).await;
        let policy = Arc::new(LocalPolicyClient::new(Arc::clone(&store)));
        let pipeline = EnforcementPipeline::new(store, policy, relational_adapters());
        let err = pipeline
            .enforce_kb_access("sales-1", "customer-db", "sql_query", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn allows_and_masks_response() {
        let store = store_with_kb_and_policy(PolicyEffect::Allow).await;
        let policy = Arc::new(LocalPolicyClient::new(Arc::clone(&store)));
        let pipeline = EnforcementPipeline::new(store, policy, relational_adapters());
        let outcome = pipeline
            .enforce_kb_access("sales-1", "customer-db", "sql_query", json!({}))
            .await
            .unwrap();
        assert_eq!(outcome.masked_fields, vec!["ssn".to_owned()]);
    }

    #[tokio::test]
    async fn invoke_authorization_denies_by_default() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let policy = Arc::new(LocalPolicyClient::new(Arc::clone(&store)));
        let pipeline = EnforcementPipeline::new(store, policy, HashMap::new());
        let err = pipeline
            .enforce_agent_invoke("sales-1", "billing-1", "invoke")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AccessDenied { .. }));
    }
}
