//! Paged discovery of registered agents and KBs.

use std::sync::Arc;

use mesh_store::{AgentQuery, AgentRecord, HealthStatus, KbQuery, KbRecord, Store};

use crate::error::Result;

const DEFAULT_LIMIT: i64 = 100;

/// Filters accepted by [`DirectoryService::list_agents`].
#[derive(Debug, Clone, Default)]
pub struct AgentListFilters {
    /// Keep only agents reporting this status.
    pub status: Option<HealthStatus>,
    /// Keep only agents declaring this capability.
    pub capability: Option<String>,
    /// Maximum rows returned; defaults to 100.
    pub limit: Option<i64>,
}

/// Filters accepted by [`DirectoryService::list_kbs`].
#[derive(Debug, Clone, Default)]
pub struct KbListFilters {
    /// Keep only KBs reporting this status.
    pub status: Option<HealthStatus>,
    /// Keep only KBs of this type.
    pub kb_type: Option<String>,
    /// Maximum rows returned; defaults to 100.
    pub limit: Option<i64>,
}

/// Result of a filtered agent listing.
#[derive(Debug, Clone)]
pub struct AgentListResult {
    /// Matching agent records.
    pub agents: Vec<AgentRecord>,
    /// Number of records returned.
    pub total_count: usize,
}

/// Result of a filtered KB listing.
#[derive(Debug, Clone)]
pub struct KbListResult {
    /// Matching KB records.
    pub kbs: Vec<KbRecord>,
    /// Number of records returned.
    pub total_count: usize,
}

/// Service for querying and discovering agents and KBs.
pub struct DirectoryService {
    store: Arc<Store>,
}

impl DirectoryService {
    /// Creates a new directory service over the given store.
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Lists registered agents matching the given filters.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_agents(&self, filters: &AgentListFilters) -> Result<AgentListResult> {
        let query = AgentQuery {
            identity: None,
            status: filters.status,
            capability: filters.capability.clone(),
            limit: filters.limit.unwrap_or(DEFAULT_LIMIT),
        };
        let agents = self.store.list_agents(&query).await?;
        Ok(AgentListResult {
            total_count: agents.len(),
            agents,
        })
    }

    /// Lists registered KBs matching the given filters.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_kbs(&self, filters: &KbListFilters) -> Result<KbListResult> {
        let query = KbQuery {
            kb_id: None,
            kb_type: filters.kb_type.clone(),
            status: filters.status,
            limit: filters.limit.unwrap_or(DEFAULT_LIMIT),
        };
        let kbs = self.store.list_kbs(&query).await?;
        Ok(KbListResult {
            total_count: kbs.len(),
            kbs,
        })
    }

    /// Finds agents declaring the given capability.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn find_agents_by_capability(
        &self,
        capability: &str,
        limit: i64,
    ) -> Result<Vec<AgentRecord>> {
        let result = self
            .list_agents(&AgentListFilters {
                status: None,
                capability: Some(capability.to_owned()),
                limit: Some(limit),
            })
            .await?;
        Ok(result.agents)
    }

    /// Finds KBs of the given type.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn find_kbs_by_type(&self, kb_type: &str, limit: i64) -> Result<Vec<KbRecord>> {
        let result = self
            .list_kbs(&KbListFilters {
                status: None,
                kb_type: Some(kb_type.to_owned()),
                limit: Some(limit),
            })
            .await?;
        Ok(result.kbs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_store::{AgentRegistration, KbRegistration};
    use serde_json::json;
    use std::collections::BTreeSet;

    async fn store_with_sample_data() -> Arc<Store> {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        store
            .register_agent(AgentRegistration {
                identity: "sales-agent-1".into(),
                version: "1.0.0".into(),
                capabilities: BTreeSet::from(["sales.lookup".to_owned()]),
                operations: vec![mesh_store::Operation::Query],
                schemas: json!({}),
                health_endpoint: "http://localhost/health".into(),
                metadata: json!({}),
            })
            .await
            .unwrap();
        store
            .register_kb(KbRegistration {
                kb_id: "customer-db".into(),
                kb_type: "relational".into(),
                endpoint: "postgres://localhost/db".into(),
                operations: vec!["sql_query".into()],
                kb_schema: json!({}),
                health_endpoint: None,
                metadata: json!({}),
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn lists_agents_with_capability_filter() {
        let store = store_with_sample_data().await;
        let svc = DirectoryService::new(store);
        let result = svc
            .list_agents(&AgentListFilters {
                status: None,
                capability: Some("sales.lookup".into()),
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(result.total_count, 1);
    }

    #[tokio::test]
    async fn lists_kbs_with_type_filter() {
        let store = store_with_sample_data().await;
        let svc = DirectoryService::new(store);
        let result = svc.find_kbs_by_type("relational", 10).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].kb_id, "customer-db");
    }

    #[tokio::test]
    async fn unmatched_capability_returns_empty() {
        let store = store_with_sample_data().await;
        let svc = DirectoryService::new(store);
        let result = svc.find_agents_by_capability("unknown.cap", 10).await.unwrap();
        assert!(result.is_empty());
    }
}
