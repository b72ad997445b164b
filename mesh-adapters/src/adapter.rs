//! The [`KbAdapter`] trait implemented by every knowledge base integration.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mesh_bus::{handler, MessageBus};
use mesh_operations::{OperationMetadata, OperationRegistry};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::health::HealthResponse;

/// Uniform interface the mesh depends on for every knowledge base.
///
/// Implementations MUST NOT apply policy or masking: `execute` returns
/// raw results only, matching `original_source`'s `BaseKBAdapter`
/// contract ("NO authorization/masking - that's mesh's job").
#[async_trait]
pub trait KbAdapter: Send + Sync {
    /// Registry identifier used for the adapter's bus subject
    /// (`{kb_id}.adapter.query`).
    fn kb_id(&self) -> &str;

    /// The operation registry backing `get_operations`/`execute`.
    fn operations(&self) -> &OperationRegistry;

    /// Establishes the underlying KB connection.
    async fn connect(&self) -> Result<()>;

    /// Closes the underlying KB connection.
    async fn disconnect(&self) -> Result<()>;

    /// Probes connectivity and returns a [`HealthResponse`].
    async fn health(&self) -> HealthResponse;

    /// Returns all registered operations keyed by name.
    fn get_operations(&self) -> HashMap<String, OperationMetadata> {
        self.operations().list()
    }

    /// Returns the input schema for a single operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Operation`] wrapping
    /// [`mesh_operations::Error::OperationNotFound`] when `name` is unknown.
    fn get_operation_schema(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.operations().schema(name)?)
    }

    /// Dispatches to the named operation's handler with raw parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Operation`] when the operation is unknown or its
    /// handler fails.
    async fn execute(&self, operation: &str, params: Value) -> Result<Value> {
        Ok(self.operations().invoke(operation, params).await?)
    }

    /// Subscribes to `{kb_id}.adapter.query` and serves request-reply:
    /// `{operation, params}` → `{status: success, data}` or
    /// `{status: error, error}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bus`] if the subscription itself cannot be
    /// established.
    async fn start_listening(self: Arc<Self>, bus: Arc<dyn MessageBus>) -> Result<()>
    where
        Self: 'static,
    {
        let kb_id = self.kb_id().to_owned();
        let subject = format!("{kb_id}.adapter.query");
        let adapter = self;

        bus.subscribe(
            &subject,
            handler(move |payload| {
                let adapter: Arc<dyn KbAdapter> = adapter.clone();
                let kb_id = kb_id.clone();
                async move { Some(handle_request(adapter.as_ref(), &kb_id, payload).await) }
            }),
        )
        .await?;

        Ok(())
    }
}

async fn handle_request(adapter: &dyn KbAdapter, kb_id: &str, payload: Value) -> Value {
    let Some(operation) = payload.get("operation").and_then(Value::as_str) else {
        warn!(kb_id, "adapter request missing operation field");
        return json!({"status": "error", "error": "missing operation in request"});
    };
    let params = payload
        .get("params")
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

    debug!(kb_id, operation, "adapter dispatching operation");

    match adapter.execute(operation, params).await {
        Ok(data) => json!({"status": "success", "data": data}),
        Err(err) => json!({"status": "error", "error": err.to_string()}),
    }
}
