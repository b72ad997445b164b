//! Request routing: the mediated entry points agents call through the
//! bus, and the in-memory invocation tracking table.
//!
//! Grounded on `examples/original_source/services/routing/request_router.py`'s
//! `RequestRouter` and `spec.md` §4.8.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mesh_bus::MessageBus;
use mesh_store::{AuditEvent, AuditEventType, AuditOutcome, Store};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::enforcement::EnforcementPipeline;
use crate::error::Error;
use crate::invocation::{InvocationRecord, InvocationStatus};

/// Request to query a knowledge base through the governed path.
#[derive(Debug, Clone, Deserialize)]
pub struct KbQueryRequest {
    /// Identity of the agent making the request.
    pub requester_id: String,
    /// Target KB identifier.
    pub kb_id: String,
    /// Operation name, validated against the KB's registered operations.
    pub operation: String,
    /// Operation parameters, forwarded to the adapter unchanged.
    #[serde(default)]
    pub params: Value,
}

/// Response to a [`KbQueryRequest`].
#[derive(Debug, Clone, Serialize)]
pub struct KbQueryResponse {
    /// One of `success`, `denied`, or `error`.
    pub status: String,
    /// Masked result data, present only on `success`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Field names redacted from `data`, present only on `success`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masked_fields: Option<Vec<String>>,
    /// Human-readable policy decision reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    /// Error message, present on `denied` or `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request to invoke an operation on another agent through the governed path.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentInvokeRequest {
    /// Identity of the agent initiating the invocation.
    pub source_agent_id: String,
    /// Identity of the target agent.
    pub target_agent_id: String,
    /// Operation requested on the target.
    pub operation: String,
    /// Operation payload, forwarded to the target unchanged.
    #[serde(default)]
    pub payload: Value,
}

/// Response to an [`AgentInvokeRequest`].
#[derive(Debug, Clone, Serialize)]
pub struct AgentInvokeResponse {
    /// Tracking identifier; empty when the invocation was denied or failed
    /// before dispatch.
    pub tracking_id: String,
    /// One of `processing`, `denied`, or `failed`.
    pub status: String,
    /// Source agent identity.
    pub source: String,
    /// Target agent identity.
    pub target: String,
    /// Operation requested.
    pub operation: String,
    /// Human-readable policy decision reason, present when authorized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    /// When the invocation was authorized and forwarded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Error message, present on `denied` or `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body published on `mesh.routing.completion` by a target agent.
#[derive(Debug, Clone, Deserialize)]
struct CompletionMessage {
    tracking_id: String,
    status: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// The routing surface: authorizes and dispatches KB queries and
/// agent invocations, and tracks invocations through to completion.
pub struct RequestRouter {
    enforcement: Arc<EnforcementPipeline>,
    store: Arc<Store>,
    bus: Arc<dyn MessageBus>,
    invocations: RwLock<HashMap<String, InvocationRecord>>,
}

impl RequestRouter {
    /// Creates a new router.
    #[must_use]
    pub fn new(enforcement: Arc<EnforcementPipeline>, store: Arc<Store>, bus: Arc<dyn MessageBus>) -> Arc<Self> {
        Arc::new(Self { enforcement, store, bus, invocations: RwLock::new(HashMap::new()) })
    }

    /// Subscribes to `mesh.routing.completion` to receive target-agent
    /// completion notifications.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bus`] if the subscription cannot be established.
    pub async fn start(self: &Arc<Self>) -> crate::error::Result<()> {
        let router = Arc::clone(self);
        self.bus
            .subscribe(
                "mesh.routing.completion",
                mesh_bus::handler(move |message| {
                    let router = Arc::clone(&router);
                    async move {
                        router.handle_completion(message).await;
                        None
                    }
                }),
            )
            .await?;
        Ok(())
    }

    /// Routes a governed knowledge base query.
    pub async fn route_kb_query(&self, request: KbQueryRequest) -> KbQueryResponse {
        match self
            .enforcement
            .enforce_kb_access(&request.requester_id, &request.kb_id, &request.operation, request.params)
            .await
        {
            Ok(outcome) => KbQueryResponse {
                status: "success".to_owned(),
                data: Some(outcome.data),
                masked_fields: Some(outcome.masked_fields),
                policy: Some(outcome.policy),
                error: None,
            },
            Err(Error::AccessDenied { reason }) => KbQueryResponse {
                status: "denied".to_owned(),
                data: None,
                masked_fields: None,
                policy: Some("access denied by policy".to_owned()),
                error: Some(reason),
            },
            Err(err) => KbQueryResponse {
                status: "error".to_owned(),
                data: None,
                masked_fields: None,
                policy: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// Routes a governed agent-to-agent invocation.
    ///
    /// On authorization, allocates a tracking id, records a `processing`
    /// [`InvocationRecord`], and dispatches the invocation to the target
    /// agent's inbox subject fire-and-forget.
    pub async fn route_agent_invoke(&self, request: AgentInvokeRequest) -> AgentInvokeResponse {
        let authorization = match self
            .enforcement
            .enforce_agent_invoke(&request.source_agent_id, &request.target_agent_id, &request.operation)
            .await
        {
            Ok(authorization) => authorization,
            Err(Error::AccessDenied { reason }) => {
                return AgentInvokeResponse {
                    tracking_id: String::new(),
                    status: "denied".to_owned(),
                    source: request.source_agent_id,
                    target: request.target_agent_id,
                    operation: request.operation,
                    policy: Some("access denied by policy".to_owned()),
                    started_at: None,
                    error: Some(reason),
                };
            }
            Err(err) => {
                return AgentInvokeResponse {
                    tracking_id: String::new(),
                    status: "failed".to_owned(),
                    source: request.source_agent_id,
                    target: request.target_agent_id,
                    operation: request.operation,
                    policy: None,
                    started_at: None,
                    error: Some(err.to_string()),
                };
            }
        };

        let target = match self.store.get_agent(&request.target_agent_id).await {
            Ok(Some(target)) => target,
            Ok(None) => {
                return AgentInvokeResponse {
                    tracking_id: String::new(),
                    status: "failed".to_owned(),
                    source: request.source_agent_id,
                    target: request.target_agent_id.clone(),
                    operation: request.operation,
                    policy: Some(authorization.policy),
                    started_at: None,
                    error: Some(
                        Error::AgentNotFound { identity: request.target_agent_id }.to_string(),
                    ),
                };
            }
            Err(err) => {
                return AgentInvokeResponse {
                    tracking_id: String::new(),
                    status: "failed".to_owned(),
                    source: request.source_agent_id,
                    target: request.target_agent_id,
                    operation: request.operation,
                    policy: Some(authorization.policy),
                    started_at: None,
                    error: Some(err.to_string()),
                };
            }
        };

        let tracking_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let record = InvocationRecord::new_processing(
            tracking_id.clone(),
            request.source_agent_id.clone(),
            request.target_agent_id.clone(),
            request.operation.clone(),
            request.payload.clone(),
            started_at,
        );
        self.invocations.write().await.insert(tracking_id.clone(), record);

        let dispatch = json!({
            "tracking_id": tracking_id,
            "source": request.source_agent_id,
            "operation": request.operation,
            "payload": request.payload,
        });
        let subject = format!("mesh.agent.{}.invoke", target.identity);
        if let Err(err) = self.bus.publish(&subject, dispatch).await {
            warn!(%err, subject, "failed to dispatch invocation to target agent");
        }

        AgentInvokeResponse {
            tracking_id,
            status: "processing".to_owned(),
            source: request.source_agent_id,
            target: request.target_agent_id,
            operation: request.operation,
            policy: Some(authorization.policy),
            started_at: Some(started_at),
            error: None,
        }
    }

    /// Returns the current state of a tracked invocation, if any.
    pub async fn get_invocation_status(&self, tracking_id: &str) -> Option<InvocationRecord> {
        self.invocations.read().await.get(tracking_id).cloned()
    }

    async fn handle_completion(&self, message: Value) {
        let completion: CompletionMessage = match serde_json::from_value(message) {
            Ok(completion) => completion,
            Err(err) => {
                warn!(%err, "malformed completion message, dropping");
                return;
            }
        };

        let mut invocations = self.invocations.write().await;
        let Some(record) = invocations.get_mut(&completion.tracking_id) else {
            warn!(tracking_id = completion.tracking_id, "completion for unknown tracking id, dropping");
            return;
        };

        let completed_at = Utc::now();
        let latency_ms = (completed_at - record.started_at).num_milliseconds();
        record.completed_at = Some(completed_at);
        if completion.status == "complete" {
            record.status = InvocationStatus::Completed;
            record.result = completion.result.clone();
        } else {
            record.status = InvocationStatus::Failed;
            record.error = completion.error.clone();
        }

        let outcome = if completion.status == "complete" { AuditOutcome::Success } else { AuditOutcome::Error };
        let source_agent_id = record.source_agent_id.clone();
        let operation = record.operation.clone();
        let tracking_id = record.tracking_id.clone();
        drop(invocations);

        if let Err(err) = self
            .store
            .log_event(AuditEvent {
                event_type: AuditEventType::Invoke,
                source_id: source_agent_id.clone(),
                target_id: None,
                outcome,
                timestamp: completed_at,
                request_metadata: Some(json!({
                    "operation": operation,
                    "tracking_id": tracking_id,
                    "status": completion.status,
                    "latency_ms": latency_ms,
                })),
                policy_decision: None,
                masked_fields: None,
                full_request: None,
                full_response: None,
                provenance_chain: None,
            })
            .await
        {
            warn!(%err, "failed to log invocation completion audit event");
        }

        let notification = json!({
            "type": "invocation_complete",
            "tracking_id": completion.tracking_id,
            "status": completion.status,
            "result": completion.result,
            "error": completion.error,
        });
        let subject = format!("mesh.agent.{source_agent_id}.notifications");
        if let Err(err) = self.bus.publish(&subject, notification).await {
            warn!(%err, subject, "failed to publish completion notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_adapters::KbAdapter;
    use mesh_bus::LocalMessageBus;
    use mesh_policy::LocalPolicyClient;
    use mesh_store::{AgentRegistration, HealthStatus, Operation, PolicyDefinition, PolicyEffect, PolicyRule};
    use std::collections::{BTreeSet, HashMap as StdHashMap};

    async fn register_agent(store: &Store, identity: &str) {
        store
            .register_agent(AgentRegistration {
                identity: identity.to_owned(),
                version: "1.0.0".into(),
                capabilities: BTreeSet::new(),
                operations: vec![Operation::Invoke],
                schemas: json!({}),
                health_endpoint: "http://localhost/health".into(),
                metadata: json!({}),
            })
            .await
            .unwrap();
        store.update_agent_status(identity, HealthStatus::Active).await.unwrap();
    }

    async fn allow_all_policy(store: &Store) {
        store
            .create_policy(PolicyDefinition {
                policy_name: "allow-all".into(),
                rules: vec![PolicyRule {
                    principal: "*".into(),
                    resource: "*".into(),
                    action: "*".into(),
                    effect: PolicyEffect::Allow,
                    masking_rules: vec![],
                }],
                precedence: 0,
                active: true,
                metadata: json!({}),
            })
            .await
            .unwrap();
    }

    fn router_for(store: Arc<Store>, bus: Arc<dyn MessageBus>) -> Arc<RequestRouter> {
        let policy = Arc::new(LocalPolicyClient::new(Arc::clone(&store)));
        let adapters: StdHashMap<String, Arc<dyn KbAdapter>> = StdHashMap::new();
        let enforcement = Arc::new(EnforcementPipeline::new(Arc::clone(&store), policy, adapters));
        RequestRouter::new(enforcement, store, bus)
    }

    #[tokio::test]
    async fn kb_query_denies_when_no_policy_matches() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let bus: Arc<dyn MessageBus> = Arc::new(LocalMessageBus::default());
        let router = router_for(store, bus);
        let response = router
            .route_kb_query(KbQueryRequest {
                requester_id: "sales-1".into(),
                kb_id: "missing-kb".into(),
                operation: "sql_query".into(),
                params: json!({}),
            })
            .await;
        assert_eq!(response.status, "error");
    }

    #[tokio::test]
    async fn agent_invoke_tracks_processing_then_completion() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        register_agent(&store, "billing-1").await;
        allow_all_policy(&store).await;
        let bus: Arc<dyn MessageBus> = Arc::new(LocalMessageBus::default());
        let router = router_for(Arc::clone(&store), Arc::clone(&bus));
        router.start().await.unwrap();

        let response = router
            .route_agent_invoke(AgentInvokeRequest {
                source_agent_id: "sales-1".into(),
                target_agent_id: "billing-1".into(),
                operation: "get_invoice".into(),
                payload: json!({"invoice_id": "INV-1"}),
            })
            .await;
        assert_eq!(response.status, "processing");
        assert!(!response.tracking_id.is_empty());

        bus.publish(
            "mesh.routing.completion",
            json!({"tracking_id": response.tracking_id, "status": "complete", "result": {"total": 42}}),
        )
        .await
        .unwrap();
        tokio::task::yield_now().await;

        let record = router.get_invocation_status(&response.tracking_id).await.unwrap();
        assert_eq!(record.status, InvocationStatus::Completed);
        assert_eq!(record.result, Some(json!({"total": 42})));
    }

    #[tokio::test]
    async fn agent_invoke_fails_when_target_missing() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        allow_all_policy(&store).await;
        let bus: Arc<dyn MessageBus> = Arc::new(LocalMessageBus::default());
        let router = router_for(store, bus);
        let response = router
            .route_agent_invoke(AgentInvokeRequest {
                source_agent_id: "sales-1".into(),
                target_agent_id: "ghost-agent".into(),
                operation: "noop".into(),
                payload: json!({}),
            })
            .await;
        assert_eq!(response.status, "failed");
        assert!(response.tracking_id.is_empty());
    }

    #[tokio::test]
    async fn unknown_completion_tracking_id_is_dropped_without_panic() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let bus: Arc<dyn MessageBus> = Arc::new(LocalMessageBus::default());
        let router = router_for(store, Arc::clone(&bus));
        router.start().await.unwrap();
        bus.publish("mesh.routing.completion", json!({"tracking_id": "does-not-exist", "status": "complete"}))
            .await
            .unwrap();
        tokio::task::yield_now().await;
    }
}
