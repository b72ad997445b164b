//! Local policy decision client delegating to [`mesh_store::Store`]'s
//! wildcard evaluator.
//!
//! This is the fallback path used when `mesh-config` carries no decision
//! service URL: the local evaluator becomes authoritative (see Open
//! Question 1 in `DESIGN.md`).

use std::sync::Arc;

use async_trait::async_trait;
use mesh_store::{PolicyEffect, Store};
use tracing::warn;

use crate::client::PolicyDecisionClient;
use crate::contracts::PolicyRequest;
use crate::decision::PolicyDecision;
use crate::error::{Error, Result};

/// Policy decision client backed by the in-process persistence store.
pub struct LocalPolicyClient {
    store: Arc<Store>,
}

impl LocalPolicyClient {
    /// Creates a client evaluating policies directly against `store`.
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PolicyDecisionClient for LocalPolicyClient {
    async fn evaluate(&self, request: &PolicyRequest) -> PolicyDecision {
        let outcome = self
            .store
            .evaluate_policy(
                &request.principal_key(),
                &request.resource_key(),
                request.action(),
            )
            .await;

        match outcome {
            Ok(decision) => match decision.effect {
                PolicyEffect::Allow => PolicyDecision::allow(
                    decision.masking_rules,
                    decision
                        .matched_policy
                        .map(|name| format!("policy `{name}` allowed"))
                        .unwrap_or_default(),
                ),
                PolicyEffect::Deny => PolicyDecision::deny(
                    decision
                        .matched_policy
                        .map(|name| format!("policy `{name}` denied"))
                        .unwrap_or_else(|| "no matching policy (default deny)".to_owned()),
                ),
            },
            Err(err) => {
                warn!(error = %err, "local policy evaluation failed, defaulting to deny");
                PolicyDecision::deny(format!("policy evaluation error: {err}"))
            }
        }
    }

    async fn health(&self) -> bool {
        self.store.health_check().await.is_ok()
    }

    async fn list_policies(&self) -> Result<Vec<String>> {
        let records = self.store.list_policies(true).await?;
        Ok(records.into_iter().map(|record| record.policy_name).collect())
    }

    async fn upload_policy(&self, _name: &str, _content: &str) -> Result<()> {
        Err(Error::Unsupported(
            "the local evaluator manages policies through mesh-store's CRUD operations, not policy text upload",
        ))
    }

    async fn delete_policy(&self, _name: &str) -> Result<()> {
        Err(Error::Unsupported(
            "the local evaluator manages policies through mesh-store's CRUD operations, not policy text deletion",
        ))
    }

    async fn get_policy_content(&self, _name: &str) -> Result<String> {
        Err(Error::Unsupported(
            "the local evaluator has no policy text representation to return",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_store::{PolicyDefinition, PolicyRule};
    use serde_json::json;

    async fn store_with_rule(effect: PolicyEffect) -> Arc<Store> {
        let store = Store::open_in_memory().await.unwrap();
        store
            .create_policy(PolicyDefinition {
                policy_name: "allow-sales".into(),
                rules: vec![PolicyRule {
                    principal: "agent:sales-*".into(),
                    resource: "kb:customer-*".into(),
                    action: "query".into(),
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
    async fn allows_when_rule_matches() {
        let client = LocalPolicyClient::new(store_with_rule(PolicyEffect::Allow).await);
        let request = PolicyRequest::new("agent", "sales-1", "kb", "customer-db", "query");
        let decision = client.evaluate(&request).await;
        assert!(decision.is_allow());
        assert_eq!(decision.masking_rules(), ["ssn"]);
    }

    #[tokio::test]
    async fn denies_by_default_when_nothing_matches() {
        let client = LocalPolicyClient::new(store_with_rule(PolicyEffect::Allow).await);
        let request = PolicyRequest::new("agent", "sales-1", "kb", "hr-db", "query");
        let decision = client.evaluate(&request).await;
        assert!(decision.is_deny());
    }

    #[tokio::test]
    async fn admin_endpoints_are_unsupported() {
        let client = LocalPolicyClient::new(Store::open_in_memory().await.unwrap().into());
        assert!(client.upload_policy("p", "text").await.is_err());
        assert!(client.delete_policy("p").await.is_err());
        assert!(client.get_policy_content("p").await.is_err());
    }
}
