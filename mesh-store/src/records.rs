//! Storage-agnostic record types for the persistence store.
//!
//! Mirrors `spec.md` §3's data model; JSON columns (`capabilities`,
//! `operations`, `rules`, `metadata`, ...) are represented here as
//! native Rust collections and (de)serialized at the store boundary.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Health status reported for an agent or knowledge base.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// The entity answered its most recent probe successfully.
    Active,
    /// The entity is reachable but reporting reduced capability.
    Degraded,
    /// The entity failed its most recent probe, or has never been probed.
    Offline,
}

impl HealthStatus {
    /// Returns the canonical string used in the `status` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Degraded => "degraded",
            Self::Offline => "offline",
        }
    }
}

impl std::str::FromStr for HealthStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "degraded" => Ok(Self::Degraded),
            "offline" => Ok(Self::Offline),
            other => Err(crate::Error::InvalidStatus(other.to_string())),
        }
    }
}

/// Operations an agent or KB adapter is permitted to perform.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Publish messages to the bus.
    Publish,
    /// Query a knowledge base.
    Query,
    /// Subscribe to a bus subject.
    Subscribe,
    /// Invoke another agent.
    Invoke,
    /// Execute an adapter-defined operation.
    Execute,
}

/// Input to registering a new agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    /// Globally unique agent identity.
    pub identity: String,
    /// Semantic version of the registering agent.
    pub version: String,
    /// Declared capability tags.
    pub capabilities: BTreeSet<String>,
    /// Declared bus operations.
    pub operations: Vec<Operation>,
    /// Optional per-operation JSON schemas.
    pub schemas: Value,
    /// URL the health monitor probes.
    pub health_endpoint: String,
    /// Free-form metadata.
    pub metadata: Value,
}

/// A persisted agent record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Internal row identifier (UUID).
    pub id: String,
    /// Globally unique agent identity.
    pub identity: String,
    /// Semantic version of the registering agent.
    pub version: String,
    /// Declared capability tags.
    pub capabilities: BTreeSet<String>,
    /// Declared bus operations.
    pub operations: Vec<Operation>,
    /// Optional per-operation JSON schemas.
    pub schemas: Value,
    /// URL the health monitor probes.
    pub health_endpoint: String,
    /// Most recent probe outcome.
    pub status: HealthStatus,
    /// When this agent was first registered.
    pub registered_at: DateTime<Utc>,
    /// Timestamp of the most recent successful heartbeat, if any.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Free-form metadata.
    pub metadata: Value,
}

/// Filters accepted by `list_agents`.
#[derive(Debug, Clone, Default)]
pub struct AgentQuery {
    /// Exact identity match.
    pub identity: Option<String>,
    /// Exact status match.
    pub status: Option<HealthStatus>,
    /// Require this capability to be present in `capabilities`.
    pub capability: Option<String>,
    /// Maximum rows returned.
    pub limit: i64,
}

impl Default for AgentQuery {
    fn default() -> Self {
        Self {
            identity: None,
            status: None,
            capability: None,
            limit: 100,
        }
    }
}

/// Input to registering a new knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbRegistration {
    /// Globally unique KB identifier.
    pub kb_id: String,
    /// Adapter-defined KB kind (e.g. `relational`, `graph`).
    pub kb_type: String,
    /// Opaque connection string; MUST NOT embed credentials.
    pub endpoint: String,
    /// Operations this KB's adapter validates and accepts.
    pub operations: Vec<String>,
    /// Optional declared schema.
    pub kb_schema: Value,
    /// Optional URL the health monitor probes.
    pub health_endpoint: Option<String>,
    /// Free-form metadata; the only place credentials may live.
    pub metadata: Value,
}

/// A persisted knowledge base record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbRecord {
    /// Internal row identifier (UUID).
    pub id: String,
    /// Globally unique KB identifier.
    pub kb_id: String,
    /// Adapter-defined KB kind (e.g. `relational`, `graph`).
    pub kb_type: String,
    /// Opaque connection string; MUST NOT embed credentials.
    pub endpoint: String,
    /// Operations this KB's adapter validates and accepts.
    pub operations: Vec<String>,
    /// Optional declared schema.
    pub kb_schema: Value,
    /// Optional URL the health monitor probes.
    pub health_endpoint: Option<String>,
    /// Most recent probe outcome.
    pub status: HealthStatus,
    /// When this KB was first registered.
    pub registered_at: DateTime<Utc>,
    /// Timestamp of the most recent health probe, if any.
    pub last_health_check: Option<DateTime<Utc>>,
    /// Free-form metadata; the only place credentials may live.
    pub metadata: Value,
}

/// Filters accepted by `list_kbs`.
#[derive(Debug, Clone, Default)]
pub struct KbQuery {
    /// Exact `kb_id` match.
    pub kb_id: Option<String>,
    /// Exact `kb_type` match.
    pub kb_type: Option<String>,
    /// Exact status match.
    pub status: Option<HealthStatus>,
    /// Maximum rows returned.
    pub limit: i64,
}

/// A single rule within a [`PolicyRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Wildcard pattern matched against the requesting principal.
    pub principal: String,
    /// Wildcard pattern matched against the target resource.
    pub resource: String,
    /// Wildcard pattern matched against the requested action.
    pub action: String,
    /// `allow` or `deny`.
    pub effect: PolicyEffect,
    /// Field names to redact from the response payload.
    #[serde(default)]
    pub masking_rules: Vec<String>,
}

/// The effect of a matched policy rule or decision.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEffect {
    /// The request is permitted.
    Allow,
    /// The request is rejected.
    Deny,
}

/// Input to creating or replacing a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDefinition {
    /// Unique policy name.
    pub policy_name: String,
    /// Ordered rules; first match (within precedence order) wins.
    pub rules: Vec<PolicyRule>,
    /// Lower values are evaluated first.
    pub precedence: i64,
    /// Inactive policies are skipped during evaluation.
    pub active: bool,
    /// Free-form metadata.
    pub metadata: Value,
}

/// A persisted policy record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRecord {
    /// Internal row identifier (UUID).
    pub id: String,
    /// Unique policy name.
    pub policy_name: String,
    /// Ordered rules; first match (within precedence order) wins.
    pub rules: Vec<PolicyRule>,
    /// Lower values are evaluated first.
    pub precedence: i64,
    /// Inactive policies are skipped during evaluation.
    pub active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp.
    pub updated_at: DateTime<Utc>,
    /// Free-form metadata.
    pub metadata: Value,
}

/// Result of [`crate::Store::evaluate_policy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// `allow` or `deny`.
    pub effect: PolicyEffect,
    /// Field names to redact from the response payload.
    pub masking_rules: Vec<String>,
    /// Name of the policy whose rule matched, if any.
    pub matched_policy: Option<String>,
}

impl PolicyDecision {
    /// The safe default when no rule matches or evaluation fails.
    #[must_use]
    pub fn default_deny() -> Self {
        Self {
            effect: PolicyEffect::Deny,
            masking_rules: Vec::new(),
            matched_policy: None,
        }
    }
}

/// Category of audited event (`spec.md` §3).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// An agent or KB was registered.
    Register,
    /// A KB query was routed.
    Query,
    /// An agent-to-agent invocation was routed.
    Invoke,
    /// A policy decision was recorded independent of routing.
    PolicyDecision,
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The operation completed as requested.
    Success,
    /// The operation was rejected by policy.
    Denied,
    /// The operation failed for a reason other than policy.
    Error,
}

/// An append-only audit event to be logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Category of the audited event.
    pub event_type: AuditEventType,
    /// Identity of the request's originator.
    pub source_id: String,
    /// Identity of the request's target, if applicable.
    pub target_id: Option<String>,
    /// Outcome of the operation.
    pub outcome: AuditOutcome,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Operation name, latency, reason — never payload values.
    pub request_metadata: Option<Value>,
    /// The policy decision that governed this operation, if any.
    pub policy_decision: Option<Value>,
    /// Field names redacted from the associated response.
    pub masked_fields: Option<Vec<String>>,
    /// Opt-in heavy-weight capture; not used in the default flow.
    pub full_request: Option<Value>,
    /// Opt-in heavy-weight capture; not used in the default flow.
    pub full_response: Option<Value>,
    /// Opt-in heavy-weight capture; not used in the default flow.
    pub provenance_chain: Option<Value>,
}

/// A persisted audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Internal row identifier (UUID).
    pub id: String,
    /// Category of the audited event.
    pub event_type: AuditEventType,
    /// Identity of the request's originator.
    pub source_id: String,
    /// Identity of the request's target, if applicable.
    pub target_id: Option<String>,
    /// Outcome of the operation.
    pub outcome: AuditOutcome,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Operation name, latency, reason — never payload values.
    pub request_metadata: Option<Value>,
    /// The policy decision that governed this operation, if any.
    pub policy_decision: Option<Value>,
    /// Field names redacted from the associated response.
    pub masked_fields: Option<Vec<String>>,
    /// Opt-in heavy-weight capture; not used in the default flow.
    pub full_request: Option<Value>,
    /// Opt-in heavy-weight capture; not used in the default flow.
    pub full_response: Option<Value>,
    /// Opt-in heavy-weight capture; not used in the default flow.
    pub provenance_chain: Option<Value>,
}

/// Filters accepted by `query_audit_logs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditQuery {
    /// Exact event-type match.
    pub event_type: Option<AuditEventType>,
    /// Exact source-id match.
    pub source_id: Option<String>,
    /// Exact target-id match.
    pub target_id: Option<String>,
    /// Exact outcome match.
    pub outcome: Option<AuditOutcome>,
    /// Inclusive lower timestamp bound.
    pub start_time: Option<DateTime<Utc>>,
    /// Inclusive upper timestamp bound.
    pub end_time: Option<DateTime<Utc>>,
    /// Maximum rows returned.
    pub limit: i64,
}

impl AuditQuery {
    /// A query matching everything, capped to a reasonable default.
    #[must_use]
    pub fn all() -> Self {
        Self {
            limit: 100,
            ..Self::default()
        }
    }
}

/// Counts returned by `get_audit_stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditStats {
    /// Row count grouped by [`AuditOutcome`] string.
    pub outcome_counts: std::collections::HashMap<String, i64>,
    /// Row count grouped by [`AuditEventType`] string.
    pub event_type_counts: std::collections::HashMap<String, i64>,
}
