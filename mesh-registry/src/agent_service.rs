//! Agent registration, validation, and lifecycle management.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mesh_bus::MessageBus;
use mesh_primitives::{validate_http_url, validate_semver};
use mesh_store::{AgentRecord, AgentRegistration, HealthStatus, Operation, Store};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::http_probe::{HttpProbe, ProbeOutcome};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Operations an agent is permitted to declare (`spec.md` §3).
const ALLOWED_OPERATIONS: &[&str] = &["publish", "query", "subscribe", "invoke", "execute"];

fn parse_operation(op: &str) -> Option<Operation> {
    match op {
        "publish" => Some(Operation::Publish),
        "query" => Some(Operation::Query),
        "subscribe" => Some(Operation::Subscribe),
        "invoke" => Some(Operation::Invoke),
        "execute" => Some(Operation::Execute),
        _ => None,
    }
}

/// Raw input to [`AgentService::register_agent`].
#[derive(Debug, Clone, Deserialize)]
pub struct AgentRegistrationRequest {
    /// Globally unique agent identity.
    pub identity: String,
    /// Semantic version of the registering agent.
    pub version: String,
    /// Declared capability tags.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Declared bus operations, as raw strings.
    #[serde(default)]
    pub operations: Vec<String>,
    /// Optional per-operation JSON schemas.
    #[serde(default)]
    pub schemas: serde_json::Value,
    /// URL the health monitor probes.
    pub health_endpoint: String,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Response to a successful [`AgentService::register_agent`] call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentRegistrationResponse {
    /// Internal row identifier.
    pub agent_id: String,
    /// Globally unique agent identity.
    pub identity: String,
    /// Semantic version of the registering agent.
    pub version: String,
    /// Initial status determined by the registration health probe.
    pub status: HealthStatus,
    /// When this agent was registered.
    pub registered_at: DateTime<Utc>,
}

/// Service for managing agent registration and lifecycle.
pub struct AgentService {
    store: Arc<Store>,
    bus: Arc<dyn MessageBus>,
    probe: HttpProbe,
}

impl AgentService {
    /// Creates a new agent service over the given store and bus.
    #[must_use]
    pub fn new(store: Arc<Store>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            store,
            bus,
            probe: HttpProbe::new(),
        }
    }

    /// Registers a new agent with validation and an initial health check.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] on a malformed request,
    /// [`Error::DuplicateIdentity`] if the identity is already taken, or
    /// propagates store/bus failures.
    pub async fn register_agent(
        &self,
        request: AgentRegistrationRequest,
    ) -> Result<AgentRegistrationResponse> {
        info!(identity = %request.identity, "registering agent");
        let operations = validate_registration(&request)?;

        if self.store.get_agent(&request.identity).await?.is_some() {
            return Err(Error::DuplicateIdentity {
                identity: request.identity,
            });
        }

        let status = self.perform_health_check(&request.health_endpoint).await;

        let agent_id = self
            .store
            .register_agent(AgentRegistration {
                identity: request.identity.clone(),
                version: request.version.clone(),
                capabilities: request.capabilities.iter().cloned().collect::<BTreeSet<_>>(),
                operations: operations.clone(),
                schemas: request.schemas.clone(),
                health_endpoint: request.health_endpoint.clone(),
                metadata: request.metadata.clone(),
            })
            .await?;
        self.store.update_agent_status(&request.identity, status).await?;

        info!(identity = %request.identity, agent_id, "agent registered successfully");

        let registered_at = Utc::now();
        if let Err(err) = self
            .bus
            .publish(
                "mesh.directory.updates",
                json!({
                    "type": "agent_registered",
                    "timestamp": registered_at.to_rfc3339(),
                    "data": {
                        "identity": request.identity,
                        "version": request.version,
                        "capabilities": request.capabilities,
                        "operations": request.operations,
                        "status": status.as_str(),
                    },
                }),
            )
            .await
        {
            warn!(error = %err, "failed to publish agent registration notification");
        }

        Ok(AgentRegistrationResponse {
            agent_id,
            identity: request.identity,
            version: request.version,
            status,
            registered_at,
        })
    }

    async fn perform_health_check(&self, endpoint: &str) -> HealthStatus {
        match self.probe.get(endpoint, HEALTH_CHECK_TIMEOUT).await {
            ProbeOutcome::Responded { status: 200, .. } => HealthStatus::Active,
            ProbeOutcome::Responded { status, .. } => {
                warn!(endpoint, status, "agent health check returned non-200");
                HealthStatus::Offline
            }
            ProbeOutcome::Timeout => {
                warn!(endpoint, "agent health check timed out");
                HealthStatus::Offline
            }
            ProbeOutcome::Error(err) => {
                warn!(endpoint, error = %err, "agent health check failed");
                HealthStatus::Offline
            }
        }
    }

    /// Returns the full record for a registered agent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the agent does not exist.
    pub async fn get_agent_details(&self, identity: &str) -> Result<AgentRecord> {
        self.store
            .get_agent(identity)
            .await?
            .ok_or_else(|| Error::NotFound {
                entity_type: "Agent",
                entity_id: identity.to_owned(),
            })
    }

    /// Updates an agent's declared capabilities and broadcasts the change.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the agent does not exist.
    pub async fn update_agent_capabilities(
        &self,
        identity: &str,
        capabilities: Vec<String>,
    ) -> Result<AgentRecord> {
        let existing = self.get_agent_details(identity).await?;
        let old_capabilities: Vec<String> = existing.capabilities.iter().cloned().collect();
        let new_capabilities: BTreeSet<String> = capabilities.iter().cloned().collect();

        self.store
            .update_agent_capabilities(identity, &new_capabilities)
            .await?;

        if let Err(err) = self
            .bus
            .publish(
                "mesh.directory.updates",
                json!({
                    "type": "agent_capability_updated",
                    "timestamp": Utc::now().to_rfc3339(),
                    "data": {
                        "identity": identity,
                        "version": existing.version,
                        "old_capabilities": old_capabilities,
                        "capabilities": capabilities,
                    },
                }),
            )
            .await
        {
            warn!(error = %err, "failed to publish capability update notification");
        }

        self.get_agent_details(identity).await
    }

    /// Removes an agent from the registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the agent does not exist.
    pub async fn deregister_agent(&self, identity: &str) -> Result<()> {
        self.get_agent_details(identity).await?;
        self.store.deregister_agent(identity).await?;
        info!(identity, "agent deregistered successfully");
        Ok(())
    }
}

fn validate_registration(request: &AgentRegistrationRequest) -> Result<Vec<Operation>> {
    if request.identity.trim().is_empty() {
        return Err(Error::validation(
            "identity",
            "identity cannot be empty",
            Some("provide a unique identifier like 'sales-agent-1'"),
        ));
    }

    validate_semver(&request.version).map_err(|_| {
        Error::validation(
            "version",
            format!("invalid semantic version: {}", request.version),
            Some("use format like '1.0.0', '2.1.3'"),
        )
    })?;

    if request.capabilities.is_empty() {
        return Err(Error::validation(
            "capabilities",
            "capabilities list cannot be empty",
            Some("provide at least one capability"),
        ));
    }

    if request.operations.is_empty() {
        return Err(Error::validation(
            "operations",
            "operations list cannot be empty",
            Some(&format!("valid operations: {}", ALLOWED_OPERATIONS.join(", "))),
        ));
    }

    let operations = request
        .operations
        .iter()
        .map(|op| {
            parse_operation(op).ok_or_else(|| {
                Error::validation(
                    "operations",
                    format!("invalid operation: {op}"),
                    Some(&format!("allowed operations: {}", ALLOWED_OPERATIONS.join(", "))),
                )
            })
        })
        .collect::<Result<Vec<_>>>()?;

    validate_http_url(&request.health_endpoint).map_err(|_| {
        Error::validation(
            "health_endpoint",
            format!("invalid URL format: {}", request.health_endpoint),
            Some("use format like 'http://localhost:8001/health'"),
        )
    })?;

    Ok(operations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_bus::LocalMessageBus;

    fn valid_request() -> AgentRegistrationRequest {
        AgentRegistrationRequest {
            identity: "sales-agent-1".into(),
            version: "1.0.0".into(),
            capabilities: vec!["sales.lookup".into()],
            operations: vec!["query".into(), "invoke".into()],
            schemas: serde_json::json!({}),
            health_endpoint: "http://localhost:9999/health".into(),
            metadata: serde_json::json!({}),
        }
    }

    async fn service() -> AgentService {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let bus: Arc<dyn MessageBus> = Arc::new(LocalMessageBus::default());
        AgentService::new(store, bus)
    }

    #[tokio::test]
    async fn rejects_empty_identity() {
        let svc = service().await;
        let mut request = valid_request();
        request.identity = String::new();
        let err = svc.register_agent(request).await.unwrap_err();
        assert!(matches!(err, Error::Validation { field, .. } if field == "identity"));
    }

    #[tokio::test]
    async fn rejects_invalid_operation() {
        let svc = service().await;
        let mut request = valid_request();
        request.operations = vec!["fly".into()];
        let err = svc.register_agent(request).await.unwrap_err();
        assert!(matches!(err, Error::Validation { field, .. } if field == "operations"));
    }

    #[tokio::test]
    async fn registers_with_offline_status_when_unreachable() {
        let svc = service().await;
        let response = svc.register_agent(valid_request()).await.unwrap();
        assert_eq!(response.status, HealthStatus::Offline);
        assert_eq!(response.identity, "sales-agent-1");
    }

    #[tokio::test]
    async fn duplicate_identity_rejected() {
        let svc = service().await;
        svc.register_agent(valid_request()).await.unwrap();
        let err = svc.register_agent(valid_request()).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateIdentity { .. }));
    }

    #[tokio::test]
    async fn update_capabilities_round_trips() {
        let svc = service().await;
        svc.register_agent(valid_request()).await.unwrap();
        let updated = svc
            .update_agent_capabilities("sales-agent-1", vec!["sales.lookup".into(), "sales.write".into()])
            .await
            .unwrap();
        assert_eq!(updated.capabilities.len(), 2);
    }

    #[tokio::test]
    async fn deregister_then_get_not_found() {
        let svc = service().await;
        svc.register_agent(valid_request()).await.unwrap();
        svc.deregister_agent("sales-agent-1").await.unwrap();
        let err = svc.get_agent_details("sales-agent-1").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
