//! In-memory directory mirror kept current from `mesh.directory.updates`
//! and served to `mesh.directory.query` request-reply callers.
//!
//! Grounded on `original_source/services/directory/subscriber.py`'s
//! `DirectorySubscriber`: seed from a full scan at startup, apply deltas
//! by removing then re-adding the affected entry, and answer queries
//! entirely from the cache rather than round-tripping to the store.

use std::sync::Arc;

use chrono::Utc;
use mesh_bus::{handler, MessageBus};
use mesh_store::{AgentQuery, KbQuery, Store};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;

const FULL_SCAN_LIMIT: i64 = 1000;

/// A cached agent entry, trimmed to what directory queries need.
#[derive(Debug, Clone, Serialize)]
pub struct AgentCacheEntry {
    /// Globally unique agent identity.
    pub identity: String,
    /// Semantic version of the registered agent.
    pub version: String,
    /// Declared capability tags.
    pub capabilities: Vec<String>,
    /// Declared bus operations.
    pub operations: Vec<String>,
    /// Last known status, as a lowercase string.
    pub status: String,
}

/// A cached KB entry, trimmed to what directory queries need.
#[derive(Debug, Clone, Serialize)]
pub struct KbCacheEntry {
    /// Globally unique KB identifier.
    pub kb_id: String,
    /// `"relational"` or `"graph"`.
    pub kb_type: String,
    /// Operations this KB's adapter accepts.
    pub operations: Vec<String>,
    /// Last known status, as a lowercase string.
    pub status: String,
}

/// In-memory mirror of the agent/KB directory.
pub struct DirectoryCache {
    store: Arc<Store>,
    agents: RwLock<Vec<AgentCacheEntry>>,
    kbs: RwLock<Vec<KbCacheEntry>>,
}

impl DirectoryCache {
    /// Creates a cache backed by `store`; call [`Self::start`] to seed it
    /// and begin serving updates/queries.
    #[must_use]
    pub fn new(store: Arc<Store>) -> Arc<Self> {
        Arc::new(Self {
            store,
            agents: RwLock::new(Vec::new()),
            kbs: RwLock::new(Vec::new()),
        })
    }

    /// Seeds the cache from a full store scan, then subscribes to
    /// `mesh.directory.updates` and `mesh.directory.query`.
    ///
    /// # Errors
    ///
    /// Propagates store or bus subscription failures.
    pub async fn start(self: Arc<Self>, bus: Arc<dyn MessageBus>) -> Result<()> {
        self.load_from_store().await?;

        let update_cache = Arc::clone(&self);
        bus.subscribe(
            "mesh.directory.updates",
            handler(move |payload| {
                let cache = Arc::clone(&update_cache);
                async move {
                    cache.apply_update(payload).await;
                    None
                }
            }),
        )
        .await?;

        let query_cache = Arc::clone(&self);
        bus.subscribe(
            "mesh.directory.query",
            handler(move |payload| {
                let cache = Arc::clone(&query_cache);
                async move { Some(cache.answer_query(payload).await) }
            }),
        )
        .await?;

        Ok(())
    }

    async fn load_from_store(&self) -> Result<()> {
        let agents = self
            .store
            .list_agents(&AgentQuery {
                identity: None,
                status: None,
                capability: None,
                limit: FULL_SCAN_LIMIT,
            })
            .await?;
        let kbs = self
            .store
            .list_kbs(&KbQuery {
                kb_id: None,
                kb_type: None,
                status: None,
                limit: FULL_SCAN_LIMIT,
            })
            .await?;

        *self.agents.write().await = agents
            .into_iter()
            .map(|agent| AgentCacheEntry {
                identity: agent.identity,
                version: agent.version,
                capabilities: agent.capabilities.into_iter().collect(),
                operations: agent.operations.iter().map(|op| operation_name(*op).to_owned()).collect(),
                status: agent.status.as_str().to_owned(),
            })
            .collect();
        *self.kbs.write().await = kbs
            .into_iter()
            .map(|kb| KbCacheEntry {
                kb_id: kb.kb_id,
                kb_type: kb.kb_type,
                operations: kb.operations,
                status: kb.status.as_str().to_owned(),
            })
            .collect();

        debug!(
            agents = self.agents.read().await.len(),
            kbs = self.kbs.read().await.len(),
            "directory cache seeded from store"
        );
        Ok(())
    }

    async fn apply_update(&self, message: Value) {
        let msg_type = message.get("type").and_then(Value::as_str).unwrap_or_default();
        let data = message.get("data").cloned().unwrap_or_else(|| json!({}));

        match msg_type {
            "agent_registered" | "agent_capability_updated" => {
                let identity = data
                    .get("identity")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                let entry = AgentCacheEntry {
                    identity: identity.clone(),
                    version: string_field(&data, "version"),
                    capabilities: string_array(&data, "capabilities"),
                    operations: string_array(&data, "operations"),
                    status: data
                        .get("status")
                        .and_then(Value::as_str)
                        .unwrap_or("active")
                        .to_owned(),
                };
                let mut agents = self.agents.write().await;
                agents.retain(|a| a.identity != identity);
                agents.push(entry);
                debug!(identity, "directory cache updated: agent");
            }
            "kb_registered" | "kb_operations_updated" => {
                let kb_id = data
                    .get("kb_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                let entry = KbCacheEntry {
                    kb_id: kb_id.clone(),
                    kb_type: string_field(&data, "kb_type"),
                    operations: string_array(&data, "operations"),
                    status: data
                        .get("status")
                        .and_then(Value::as_str)
                        .unwrap_or("active")
                        .to_owned(),
                };
                let mut kbs = self.kbs.write().await;
                kbs.retain(|k| k.kb_id != kb_id);
                kbs.push(entry);
                debug!(kb_id, "directory cache updated: KB");
            }
            other => warn!(update_type = other, "unknown directory update type"),
        }
    }

    async fn answer_query(&self, request: Value) -> Value {
        let query_type = request.get("type").and_then(Value::as_str).unwrap_or("both");
        let capability_filter = request.get("capability_filter").and_then(Value::as_str);
        let status_filter = request.get("status_filter").and_then(Value::as_str);
        let type_filter = request.get("type_filter").and_then(Value::as_str);

        let mut agents = self.agents.read().await.clone();
        let mut kbs = self.kbs.read().await.clone();

        if let Some(capability) = capability_filter {
            agents.retain(|a| a.capabilities.iter().any(|c| c == capability));
        }
        if let Some(status) = status_filter {
            agents.retain(|a| a.status == status);
            kbs.retain(|k| k.status == status);
        }
        if let Some(kb_type) = type_filter {
            kbs.retain(|k| k.kb_type == kb_type);
        }

        if query_type == "agents" {
            kbs.clear();
        } else if query_type == "kbs" {
            agents.clear();
        }

        let total_count = match query_type {
            "agents" => agents.len(),
            "kbs" => kbs.len(),
            _ => agents.len() + kbs.len(),
        };

        let mut filters_applied = serde_json::Map::new();
        if let Some(capability) = capability_filter {
            filters_applied.insert("capability".into(), json!(capability));
        }
        if let Some(status) = status_filter {
            filters_applied.insert("status".into(), json!(status));
        }
        if let Some(kb_type) = type_filter {
            filters_applied.insert("type".into(), json!(kb_type));
        }

        json!({
            "agents": agents,
            "kbs": kbs,
            "total_count": total_count,
            "filters_applied": Value::Object(filters_applied),
            "timestamp": Utc::now().to_rfc3339(),
        })
    }
}

fn operation_name(op: mesh_store::Operation) -> &'static str {
    match op {
        mesh_store::Operation::Publish => "publish",
        mesh_store::Operation::Query => "query",
        mesh_store::Operation::Subscribe => "subscribe",
        mesh_store::Operation::Invoke => "invoke",
        mesh_store::Operation::Execute => "execute",
    }
}

fn string_field(data: &Value, key: &str) -> String {
    data.get(key).and_then(Value::as_str).unwrap_or_default().to_owned()
}

fn string_array(data: &Value, key: &str) -> Vec<String> {
    data.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_bus::LocalMessageBus;
    use std::time::Duration;

    #[tokio::test]
    async fn seeds_from_store_on_start() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        store
            .register_agent(mesh_store::AgentRegistration {
                identity: "agent-1".into(),
                version: "1.0.0".into(),
                capabilities: std::collections::BTreeSet::from(["sales.lookup".to_owned()]),
                operations: vec![mesh_store::Operation::Query],
                schemas: json!({}),
                health_endpoint: "http://localhost/health".into(),
                metadata: json!({}),
            })
            .await
            .unwrap();

        let bus: Arc<dyn MessageBus> = Arc::new(LocalMessageBus::default());
        let cache = DirectoryCache::new(Arc::clone(&store));
        cache.clone().start(bus).await.unwrap();

        assert_eq!(cache.agents.read().await.len(), 1);
    }

    #[tokio::test]
    async fn registration_event_updates_cache_without_duplication() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let bus: Arc<dyn MessageBus> = Arc::new(LocalMessageBus::default());
        let cache = DirectoryCache::new(store);
        cache.clone().start(Arc::clone(&bus)).await.unwrap();

        let event = json!({
            "type": "agent_registered",
            "data": {
                "identity": "agent-1",
                "version": "1.0.0",
                "capabilities": ["sales.lookup"],
                "operations": ["query"],
                "status": "active",
            }
        });
        bus.publish("mesh.directory.updates", event.clone()).await.unwrap();
        bus.publish("mesh.directory.updates", event).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.agents.read().await.len(), 1);
    }

    #[tokio::test]
    async fn query_filters_by_capability() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let bus: Arc<dyn MessageBus> = Arc::new(LocalMessageBus::default());
        let cache = DirectoryCache::new(store);
        cache.clone().start(Arc::clone(&bus)).await.unwrap();

        bus.publish(
            "mesh.directory.updates",
            json!({
                "type": "agent_registered",
                "data": {
                    "identity": "agent-1",
                    "version": "1.0.0",
                    "capabilities": ["sales.lookup"],
                    "operations": ["query"],
                    "status": "active",
                }
            }),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let response = bus
            .request(
                "mesh.directory.query",
                json!({"type": "agents", "capability_filter": "sales.lookup"}),
                Duration::from_secs(1),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response["total_count"], 1);
    }
}
