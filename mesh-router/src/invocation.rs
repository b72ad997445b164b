//! The `InvocationRecord` state machine tracking agent-to-agent calls.
//!
//! Grounded on `services/routing/schemas.py`'s `InvocationRecord`/
//! `InvocationStatus`: `processing` is the sole non-terminal state;
//! `denied`, `completed`, and `failed` are terminal, and an unknown
//! `tracking_id` on completion produces no transition (`spec.md` §4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a routed agent-to-agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    /// Authorized and forwarded to the target agent; awaiting completion.
    Processing,
    /// Policy denied the invocation before it was forwarded.
    Denied,
    /// The target agent reported successful completion.
    Completed,
    /// The target agent reported failure, or completion processing errored.
    Failed,
}

/// A tracked agent-to-agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRecord {
    /// Unique tracking identifier (UUID).
    pub tracking_id: String,
    /// Agent that initiated the invocation.
    pub source_agent_id: String,
    /// Agent the invocation was routed to.
    pub target_agent_id: String,
    /// Operation requested on the target.
    pub operation: String,
    /// Operation payload as sent to the target.
    pub payload: Value,
    /// Current lifecycle state.
    pub status: InvocationStatus,
    /// When the invocation was authorized and forwarded.
    pub started_at: DateTime<Utc>,
    /// When the invocation reached a terminal state, if it has.
    pub completed_at: Option<DateTime<Utc>>,
    /// Result payload reported by the target, on success.
    pub result: Option<Value>,
    /// Error message, on failure.
    pub error: Option<String>,
}

impl InvocationRecord {
    /// Creates a new record in the `processing` state.
    #[must_use]
    pub fn new_processing(
        tracking_id: String,
        source_agent_id: String,
        target_agent_id: String,
        operation: String,
        payload: Value,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tracking_id,
            source_agent_id,
            target_agent_id,
            operation,
            payload,
            status: InvocationStatus::Processing,
            started_at,
            completed_at: None,
            result: None,
            error: None,
        }
    }
}
