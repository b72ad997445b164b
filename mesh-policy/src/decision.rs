//! The decision returned by a policy evaluation.

use serde::{Deserialize, Serialize};

/// Outcome of evaluating a [`crate::PolicyRequest`].
///
/// Binary by design: `spec.md` defines only allow/deny, unlike richer
/// three-way (allow/deny/escalate) policy engines. A decision always
/// carries a `reason`, even on allow, so audit logs can record why a
/// request passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    allow: bool,
    #[serde(default)]
    masking_rules: Vec<String>,
    #[serde(default)]
    reason: String,
}

impl PolicyDecision {
    /// Returns an allow decision with the supplied masking rules and reason.
    #[must_use]
    pub fn allow(masking_rules: Vec<String>, reason: impl Into<String>) -> Self {
        Self {
            allow: true,
            masking_rules,
            reason: reason.into(),
        }
    }

    /// Returns a safe-default deny decision carrying the supplied reason.
    ///
    /// Used for every failure mode a [`crate::PolicyDecisionClient`]
    /// encounters (timeout, non-2xx, decode error, network error) as well
    /// as for policy misses in the local evaluator.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            masking_rules: Vec::new(),
            reason: reason.into(),
        }
    }

    /// Returns true when the request is permitted.
    #[must_use]
    pub fn is_allow(&self) -> bool {
        self.allow
    }

    /// Returns true when the request is denied.
    #[must_use]
    pub fn is_deny(&self) -> bool {
        !self.allow
    }

    /// Returns the field names that must be masked from the response.
    #[must_use]
    pub fn masking_rules(&self) -> &[String] {
        &self.masking_rules
    }

    /// Returns the human-readable reason for the decision.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_carries_no_masking_rules() {
        let decision = PolicyDecision::deny("no matching rule");
        assert!(decision.is_deny());
        assert!(decision.masking_rules().is_empty());
        assert_eq!(decision.reason(), "no matching rule");
    }

    #[test]
    fn allow_preserves_masking_rules() {
        let decision = PolicyDecision::allow(vec!["ssn".into()], "policy-1 matched");
        assert!(decision.is_allow());
        assert_eq!(decision.masking_rules(), ["ssn"]);
    }
}
