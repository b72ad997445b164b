//! Reference adapter for relational knowledge bases.
//!
//! Registers the operation names `spec.md` §4.3 gives verbatim for the
//! relational family (`sql_query`, `insert`, `update`, `delete`). The
//! backing store here is an in-memory row list: the mesh's non-goals
//! explicitly exclude transcoding KB query languages or implementing KB
//! logic, so this adapter exists to exercise the contract end to end
//! rather than to be a production SQL client.

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

/// In-memory relational adapter implementing the `sql_query`/`insert`/
/// `update`/`delete` operation family.
pub struct RelationalKbAdapter {
    kb_id: String,
    connected: AtomicBool,
    operations: OperationRegistry,
    rows: Arc<RwLock<Vec<Value>>>,
}

impl RelationalKbAdapter {
    /// Creates a new adapter for the given KB identifier.
    ///
    /// # Panics
    ///
    /// Panics if operation registration fails, which only happens if this
    /// constructor registers a duplicate name (a programming error).
    #[must_use]
    pub fn new(kb_id: impl Into<String>) -> Self {
        let operations = OperationRegistry::new();
        let rows: Arc<RwLock<Vec<Value>>> = Arc::new(RwLock::new(Vec::new()));
        register_operations(&operations, rows.clone());

        Self {
            kb_id: kb_id.into(),
            connected: AtomicBool::new(false),
            operations,
            rows,
        }
    }
}

fn register_operations(registry: &OperationRegistry, rows: Arc<RwLock<Vec<Value>>>) {
    registry
        .register(
            OperationMetadata::new("sql_query")
                .unwrap()
                .with_description("Executes a read-only query against the relational store")
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                })),
            {
                let rows = rows.clone();
                move |_params: Value| {
                    let rows = rows.clone();
                    async move { Ok(json!({ "rows": rows.read().await.clone() })) }
                }
            },
        )
        .expect("sql_query registered once");

    registry
        .register(
            OperationMetadata::new("insert")
                .unwrap()
                .with_description("Appends a row to the relational store")
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {"row": {"type": "object"}},
                    "required": ["row"]
                })),
            {
                let rows = rows.clone();
                move |params: Value| {
                    let rows = rows.clone();
                    async move {
                        let row = params.get("row").cloned().ok_or_else(|| {
                            OpError::InvalidParams {
                                name: "insert".into(),
                                reason: "missing `row`".into(),
                            }
                        })?;
                        let mut guard = rows.write().await;
                        guard.push(row);
                        Ok(json!({ "inserted": 1, "index": guard.len() - 1 }))
                    }
                }
            },
        )
        .expect("insert registered once");

    registry
        .register(
            OperationMetadata::new("update")
                .unwrap()
                .with_description("Replaces a row by index")
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {"index": {"type": "integer"}, "row": {"type": "object"}},
                    "required": ["index", "row"]
                })),
            {
                let rows = rows.clone();
                move |params: Value| {
                    let rows = rows.clone();
                    async move {
                        let index = params
                            .get("index")
                            .and_then(Value::as_u64)
                            .ok_or_else(|| OpError::InvalidParams {
                                name: "update".into(),
                                reason: "missing `index`".into(),
                            })? as usize;
                        let row = params.get("row").cloned().ok_or_else(|| {
                            OpError::InvalidParams {
                                name: "update".into(),
                                reason: "missing `row`".into(),
                            }
                        })?;

                        let mut guard = rows.write().await;
                        let slot = guard.get_mut(index).ok_or_else(|| OpError::Execution {
                            reason: format!("no row at index {index}"),
                        })?;
                        *slot = row;
                        Ok(json!({ "updated": 1 }))
                    }
                }
            },
        )
        .expect("update registered once");

    registry
        .register(
            OperationMetadata::new("delete")
                .unwrap()
                .with_description("Removes a row by index")
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {"index": {"type": "integer"}},
                    "required": ["index"]
                })),
            move |params: Value| {
                let rows = rows.clone();
                async move {
                    let index = params
                        .get("index")
                        .and_then(Value::as_u64)
                        .ok_or_else(|| OpError::InvalidParams {
                            name: "delete".into(),
                            reason: "missing `index`".into(),
                        })? as usize;

                    let mut guard = rows.write().await;
                    if index >= guard.len() {
                        return Err(OpError::Execution {
                            reason: format!("no row at index {index}"),
                        });
                    }
                    guard.remove(index);
                    Ok(json!({ "deleted": 1 }))
                }
            },
        )
        .expect("delete registered once");
}

#[async_trait]
impl KbAdapter for RelationalKbAdapter {
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
