//! Policy request and decision contracts exchanged with a decision service.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input record sent to a policy decision service.
///
/// Mirrors the `{principal_type, principal_id, resource_type, resource_id,
/// action, context?}` shape the decision service expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRequest {
    principal_type: String,
    principal_id: String,
    resource_type: String,
    resource_id: String,
    action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<Value>,
}

impl PolicyRequest {
    /// Creates a new policy request for the supplied principal/resource/action.
    #[must_use]
    pub fn new(
        principal_type: impl Into<String>,
        principal_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            principal_type: principal_type.into(),
            principal_id: principal_id.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            action: action.into(),
            context: None,
        }
    }

    /// Attaches additional context to the request.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Returns the principal type (e.g. `agent`).
    #[must_use]
    pub fn principal_type(&self) -> &str {
        &self.principal_type
    }

    /// Returns the principal identifier.
    #[must_use]
    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }

    /// Returns the resource type (e.g. `kb`, `agent`).
    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Returns the resource identifier.
    #[must_use]
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Returns the action being evaluated.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Returns the optional context attached to the request.
    #[must_use]
    pub fn context(&self) -> Option<&Value> {
        self.context.as_ref()
    }

    /// The `{type}:{id}` key used by the local wildcard evaluator for the
    /// principal side of a rule.
    #[must_use]
    pub fn principal_key(&self) -> String {
        format!("{}:{}", self.principal_type, self.principal_id)
    }

    /// The `{type}:{id}` key used by the local wildcard evaluator for the
    /// resource side of a rule.
    #[must_use]
    pub fn resource_key(&self) -> String {
        format!("{}:{}", self.resource_type, self.resource_id)
    }
}
