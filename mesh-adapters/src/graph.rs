//! Reference adapter for graph knowledge bases.
//!
//! Registers the operation names `spec.md` §4.3 gives verbatim for the
//! graph family (`cypher_query`, `create_node`, `create_relationship`,
//! `find_node`). Like [`crate::RelationalKbAdapter`], the backing store is
//! an in-memory structure rather than a real graph database driver: the
//! mesh's job is routing and enforcement, not KB query execution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use mesh_operations::{Error as OpError, OperationMetadata, OperationRegistry};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::adapter::KbAdapter;
use crate::error::Result;
use crate::health::HealthResponse;

#[derive(Debug, Clone, Default)]
struct Graph {
    nodes: Vec<Value>,
    relationships: Vec<Value>,
}

/// In-memory graph adapter implementing the `cypher_query`/`create_node`/
/// `create_relationship`/`find_node` operation family.
pub struct GraphKbAdapter {
    kb_id: String,
    connected: AtomicBool,
    operations: OperationRegistry,
    graph: Arc<RwLock<Graph>>,
}

impl GraphKbAdapter {
    /// Creates a new adapter for the given KB identifier.
    ///
    /// # Panics
    ///
    /// Panics if operation registration fails, which only happens if this
    /// constructor registers a duplicate name (a programming error).
    #[must_use]
    pub fn new(kb_id: impl Into<String>) -> Self {
        let operations = OperationRegistry::new();
        let graph: Arc<RwLock<Graph>> = Arc::new(RwLock::new(Graph::default()));
        register_operations(&operations, graph.clone());

        Self {
            kb_id: kb_id.into(),
            connected: AtomicBool::new(false),
            operations,
            graph,
        }
    }
}

fn register_operations(registry: &OperationRegistry, graph: Arc<RwLock<Graph>>) {
    registry
        .register(
            OperationMetadata::new("cypher_query")
                .unwrap()
                .with_description("Executes a read-only traversal against the graph store")
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                })),
            {
                let graph = graph.clone();
                move |_params: Value| {
                    let graph = graph.clone();
                    async move {
                        let guard = graph.read().await;
                        Ok(json!({
                            "nodes": guard.nodes,
                            "relationships": guard.relationships,
                        }))
                    }
                }
            },
        )
        .expect("cypher_query registered once");

    registry
        .register(
            OperationMetadata::new("create_node")
                .unwrap()
                .with_description("Creates a node with the given labels and properties")
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {
                        "labels": {"type": "array", "items": {"type": "string"}},
                        "properties": {"type": "object"}
                    },
                    "required": ["labels"]
                })),
            {
                let graph = graph.clone();
                move |params: Value| {
                    let graph = graph.clone();
                    async move {
                        let labels = params.get("labels").cloned().ok_or_else(|| {
                            OpError::InvalidParams {
                                name: "create_node".into(),
                                reason: "missing `labels`".into(),
                            }
                        })?;
                        let properties = params
                            .get("properties")
                            .cloned()
                            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

                        let mut guard = graph.write().await;
                        let id = guard.nodes.len();
                        let node = json!({"id": id, "labels": labels, "properties": properties});
                        guard.nodes.push(node.clone());
                        Ok(json!({"node": node}))
                    }
                }
            },
        )
        .expect("create_node registered once");

    registry
        .register(
            OperationMetadata::new("create_relationship")
                .unwrap()
                .with_description("Creates a relationship between two existing nodes")
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {
                        "from_id": {"type": "integer"},
                        "to_id": {"type": "integer"},
                        "kind": {"type": "string"}
                    },
                    "required": ["from_id", "to_id", "kind"]
                })),
            {
                let graph = graph.clone();
                move |params: Value| {
                    let graph = graph.clone();
                    async move {
                        let from_id = params.get("from_id").and_then(Value::as_u64).ok_or_else(|| {
                            OpError::InvalidParams {
                                name: "create_relationship".into(),
                                reason: "missing `from_id`".into(),
                            }
                        })?;
                        let to_id = params.get("to_id").and_then(Value::as_u64).ok_or_else(|| {
                            OpError::InvalidParams {
                                name: "create_relationship".into(),
                                reason: "missing `to_id`".into(),
                            }
                        })?;
                        let kind = params
                            .get("kind")
                            .and_then(Value::as_str)
                            .ok_or_else(|| OpError::InvalidParams {
                                name: "create_relationship".into(),
                                reason: "missing `kind`".into(),
                            })?
                            .to_owned();

                        let mut guard = graph.write().await;
                        let from_exists = guard.nodes.len() as u64 > from_id;
                        let to_exists = guard.nodes.len() as u64 > to_id;
                        if !from_exists || !to_exists {
                            return Err(OpError::execution("from_id or to_id does not exist"));
                        }

                        let rel = json!({"from_id": from_id, "to_id": to_id, "kind": kind});
                        guard.relationships.push(rel.clone());
                        Ok(json!({"relationship": rel}))
                    }
                }
            },
        )
        .expect("create_relationship registered once");

    registry
        .register(
            OperationMetadata::new("find_node")
                .unwrap()
                .with_description("Finds nodes matching a label")
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {"label": {"type": "string"}},
                    "required": ["label"]
                })),
            move |params: Value| {
                let graph = graph.clone();
                async move {
                    let label = params
                        .get("label")
                        .and_then(Value::as_str)
                        .ok_or_else(|| OpError::InvalidParams {
                            name: "find_node".into(),
                            reason: "missing `label`".into(),
                        })?
                        .to_owned();

                    let guard = graph.read().await;
                    let matches: Vec<Value> = guard
                        .nodes
                        .iter()
                        .filter(|node| {
                            node.get("labels")
                                .and_then(Value::as_array)
                                .is_some_and(|labels| {
                                    labels.iter().any(|l| l.as_str() == Some(label.as_str()))
                                })
                        })
                        .cloned()
                        .collect();
                    Ok(json!({"nodes": matches}))
                }
            },
        )
        .expect("find_node registered once");
}

#[async_trait]
impl KbAdapter for GraphKbAdapter {
    fn kb_id(&self) -> &str {
        &self.kb_id
    }

    fn operations(&self) -> &OperationRegistry {
        &self.operations
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn health(&self) -> HealthResponse {
        let start = Instant::now();
        if self.connected.load(Ordering::SeqCst) {
            HealthResponse::healthy(start.elapsed().as_secs_f64() * 1000.0)
        } else {
            HealthResponse::unhealthy("not connected")
        }
    }
}
