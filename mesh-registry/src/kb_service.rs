//! Knowledge base registration, validation, and lifecycle management.

use std::sync::Arc;

use chrono::Utc;
use mesh_adapters::{GraphKbAdapter, KbAdapter, RelationalKbAdapter};
use mesh_bus::MessageBus;
use mesh_store::{HealthStatus, KbRecord, KbRegistration, Store};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// KB types this mesh ships reference adapters for (`spec.md` §4.5).
const SUPPORTED_KB_TYPES: &[&str] = &["relational", "graph"];

fn allowed_operations(kb_type: &str) -> &'static [&'static str] {
    match kb_type {
        "relational" => &["sql_query", "insert", "update", "delete"],
        "graph" => &["cypher_query", "create_node", "create_relationship", "find_node"],
        _ => &[],
    }
}

/// Raw input to [`KbService::register_kb`].
#[derive(Debug, Clone, Deserialize)]
pub struct KbRegistrationRequest {
    /// Globally unique KB identifier.
    pub kb_id: String,
    /// `"relational"` or `"graph"`.
    pub kb_type: String,
    /// Opaque connection string; must not embed credentials.
    pub endpoint: String,
    /// Operations this KB's adapter will accept.
    #[serde(default)]
    pub operations: Vec<String>,
    /// Optional declared schema.
    #[serde(default)]
    pub kb_schema: Value,
    /// Credentials to merge into metadata before persisting, if any.
    #[serde(default)]
    pub credentials: Option<Value>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Value,
}

/// Response to a successful [`KbService::register_kb`] call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct KbRegistrationResponse {
    /// Internal row identifier.
    pub kb_record_id: String,
    /// Globally unique KB identifier.
    pub kb_id: String,
    /// `"relational"` or `"graph"`.
    pub kb_type: String,
    /// Status determined by the registration connectivity check.
    pub status: HealthStatus,
    /// Human-readable outcome summary; includes a warning when offline.
    pub message: String,
}

/// Service for managing KB registration and lifecycle.
pub struct KbService {
    store: Arc<Store>,
    bus: Arc<dyn MessageBus>,
}

impl KbService {
    /// Creates a new KB service over the given store and bus.
    #[must_use]
    pub fn new(store: Arc<Store>, bus: Arc<dyn MessageBus>) -> Self {
        Self { store, bus }
    }

    /// Registers a new knowledge base with validation and a connectivity
    /// check.
    ///
    /// Registration succeeds even when the connectivity check fails; the
    /// KB is stored with `offline` status and a warning attached to the
    /// response message, per `spec.md` §4.5.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedKbType`] or [`Error::InvalidOperation`]
    /// on a malformed request, [`Error::DuplicateKb`] if `kb_id` is
    /// already registered, or propagates store/bus failures.
    pub async fn register_kb(
        &self,
        request: KbRegistrationRequest,
    ) -> Result<KbRegistrationResponse> {
        info!(kb_id = %request.kb_id, kb_type = %request.kb_type, "registering KB");

        if !SUPPORTED_KB_TYPES.contains(&request.kb_type.as_str()) {
            return Err(Error::UnsupportedKbType {
                kb_type: request.kb_type,
                supported: SUPPORTED_KB_TYPES.join(", "),
            });
        }

        validate_operations(&request.kb_type, &request.operations)?;

        if self.store.get_kb(&request.kb_id).await?.is_some() {
            return Err(Error::DuplicateKb {
                kb_id: request.kb_id,
            });
        }

        let (status, probe_error) = check_connectivity(&request.kb_type, &request.kb_id).await;

        let mut metadata = request.metadata.as_object().cloned().unwrap_or_default();
        if let Some(Value::Object(creds)) = &request.credentials {
            metadata.extend(creds.clone());
        }

        let kb_record_id = self
            .store
            .register_kb(KbRegistration {
                kb_id: request.kb_id.clone(),
                kb_type: request.kb_type.clone(),
                endpoint: request.endpoint.clone(),
                operations: request.operations.clone(),
                kb_schema: request.kb_schema.clone(),
                health_endpoint: None,
                metadata: Value::Object(metadata),
            })
            .await?;
        self.store.update_kb_status(&request.kb_id, status).await?;

        info!(kb_id = %request.kb_id, kb_record_id, "KB registered successfully");

        if let Err(err) = self
            .bus
            .publish(
                "mesh.directory.updates",
                json!({
                    "type": "kb_registered",
                    "timestamp": Utc::now().to_rfc3339(),
                    "data": {
                        "kb_id": request.kb_id,
                        "kb_type": request.kb_type,
                        "operations": request.operations,
                        "status": status.as_str(),
                    },
                }),
            )
            .await
        {
            warn!(error = %err, "failed to publish KB registration notification");
        }

        let mut message = "KB registered successfully".to_owned();
        if status == HealthStatus::Offline {
            if let Some(reason) = probe_error {
                message.push_str(&format!(" (Warning: {reason})"));
            }
        }

        Ok(KbRegistrationResponse {
            kb_record_id,
            kb_id: request.kb_id,
            kb_type: request.kb_type,
            status,
            message,
        })
    }

    /// Returns the full record for a registered KB.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the KB does not exist.
    pub async fn get_kb_details(&self, kb_id: &str) -> Result<KbRecord> {
        self.store
            .get_kb(kb_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                entity_type: "KB",
                entity_id: kb_id.to_owned(),
            })
    }

    /// Updates a KB's declared operation list and broadcasts the change.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the KB does not exist, or
    /// [`Error::InvalidOperation`] if a requested operation is not valid
    /// for the KB's type.
    pub async fn update_kb_operations(
        &self,
        kb_id: &str,
        operations: Vec<String>,
    ) -> Result<KbRecord> {
        let existing = self.get_kb_details(kb_id).await?;
        validate_operations(&existing.kb_type, &operations)?;
        let old_operations = existing.operations.clone();

        self.store.update_kb_operations(kb_id, &operations).await?;

        if let Err(err) = self
            .bus
            .publish(
                "mesh.directory.updates",
                json!({
                    "type": "kb_operations_updated",
                    "timestamp": Utc::now().to_rfc3339(),
                    "data": {
                        "kb_id": kb_id,
                        "kb_type": existing.kb_type,
                        "old_operations": old_operations,
                        "operations": operations,
                    },
                }),
            )
            .await
        {
            warn!(error = %err, "failed to publish KB operations update notification");
        }

        self.get_kb_details(kb_id).await
    }

    /// Removes a KB from the registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the KB does not exist.
    pub async fn deregister_kb(&self, kb_id: &str) -> Result<()> {
        self.get_kb_details(kb_id).await?;
        self.store.deregister_kb(kb_id).await?;
        info!(kb_id, "KB deregistered successfully");
        Ok(())
    }
}

fn validate_operations(kb_type: &str, operations: &[String]) -> Result<()> {
    let allowed = allowed_operations(kb_type);
    for op in operations {
        if !allowed.contains(&op.as_str()) {
            return Err(Error::InvalidOperation {
                operation: op.clone(),
                allowed: allowed.join(", "),
            });
        }
    }
    Ok(())
}

/// Connectivity check dispatched by `kb_type`.
///
/// The reference adapters this mesh ships are in-memory (no real
/// external dependency), so the check here exercises the same
/// connect-then-probe path the router uses at request time rather than
/// reaching out to a real database; this mirrors the spec's own
/// description of the check as "a trivial query".
async fn check_connectivity(kb_type: &str, kb_id: &str) -> (HealthStatus, Option<String>) {
    let adapter: Arc<dyn KbAdapter> = match kb_type {
        "relational" => Arc::new(RelationalKbAdapter::new(kb_id)),
        "graph" => Arc::new(GraphKbAdapter::new(kb_id)),
        other => {
            return (
                HealthStatus::Offline,
                Some(format!("unsupported KB type: {other}")),
            )
        }
    };

    if let Err(err) = adapter.connect().await {
        return (HealthStatus::Offline, Some(err.to_string()));
    }

    let health = adapter.health().await;
    match health.status {
        mesh_adapters::AdapterHealth::Healthy => (HealthStatus::Active, None),
        _ => (HealthStatus::Offline, health.message),
    }
}
