#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Generic operation registry shared by AgentMesh KB adapters.
//!
//! Near-direct port of `agent-tools::registry`'s `ToolRegistry`: a
//! `RwLock<HashMap<String, Handle>>` keyed by operation name, duplicate/
//! unknown-name error variants, and a blanket `Fn` implementation so
//! adapters can register plain async closures as handlers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Result alias for operation registry calls.
pub type Result<T> = std::result::Result<T, Error>;

/// Future alias produced by an operation handler.
pub type OperationFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Errors produced by operation registration and invocation.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation metadata failed validation.
    #[error("invalid operation metadata: {reason}")]
    InvalidMetadata {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// An operation with this name is already registered.
    #[error("operation `{name}` is already registered")]
    DuplicateOperation {
        /// Name of the offending operation.
        name: String,
    },

    /// The requested operation does not exist.
    #[error("operation `{name}` not found")]
    OperationNotFound {
        /// Name of the missing operation.
        name: String,
    },

    /// The supplied parameters did not satisfy the operation's input schema.
    #[error("invalid parameters for `{name}`: {reason}")]
    InvalidParams {
        /// Name of the operation being invoked.
        name: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Operation execution failed.
    #[error("operation execution failed: {reason}")]
    Execution {
        /// Human-readable error returned by the handler.
        reason: String,
    },
}

impl Error {
    /// Creates an execution error from the supplied reason.
    #[must_use]
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }
}

/// Metadata describing a registered operation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationMetadata {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_schema: Option<Value>,
}

impl OperationMetadata {
    /// Creates metadata for the supplied operation name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMetadata`] if the name is empty.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidMetadata {
                reason: "operation name cannot be empty".into(),
            });
        }

        Ok(Self {
            name,
            description: None,
            input_schema: None,
            output_schema: None,
        })
    }

    /// Sets the human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the JSON Schema describing accepted parameters.
    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Sets the JSON Schema describing the returned value.
    #[must_use]
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Returns the operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the input JSON Schema, if any.
    #[must_use]
    pub fn input_schema(&self) -> Option<&Value> {
        self.input_schema.as_ref()
    }

    /// Returns the output JSON Schema, if any.
    #[must_use]
    pub fn output_schema(&self) -> Option<&Value> {
        self.output_schema.as_ref()
    }
}

/// Trait implemented by operation handlers.
#[async_trait]
pub trait Operation: Send + Sync {
    /// Executes the operation with the given JSON parameters, returning a
    /// JSON result.
    async fn call(&self, params: Value) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> Operation for F
where
    F: Send + Sync + Fn(Value) -> Fut,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn call(&self, params: Value) -> Result<Value> {
        (self)(params).await
    }
}

/// Handle returned by the registry for direct invocation.
#[derive(Clone)]
pub struct OperationHandle {
    metadata: OperationMetadata,
    executor: Arc<dyn Operation>,
}

impl OperationHandle {
    /// Returns the associated metadata.
    #[must_use]
    pub fn metadata(&self) -> &OperationMetadata {
        &self.metadata
    }

    /// Executes the underlying handler.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::Execution`] returned by the underlying handler.
    pub async fn call(&self, params: Value) -> Result<Value> {
        self.executor.call(params).await
    }
}

/// Registry mapping operation names to (metadata, handler) pairs.
#[derive(Default)]
pub struct OperationRegistry {
    inner: RwLock<HashMap<String, OperationHandle>>,
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().expect("operation registry poisoned");
        let names: Vec<_> = inner.keys().cloned().collect();
        f.debug_struct("OperationRegistry")
            .field("registered", &names)
            .finish()
    }
}

impl OperationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an operation handler under `metadata.name()`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateOperation`] if the name is already present.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn register<O>(&self, metadata: OperationMetadata, operation: O) -> Result<()>
    where
        O: Operation + 'static,
    {
        let mut inner = self.inner.write().expect("operation registry poisoned");
        let name = metadata.name().to_owned();
        if inner.contains_key(&name) {
            return Err(Error::DuplicateOperation { name });
        }

        inner.insert(
            name,
            OperationHandle {
                metadata,
                executor: Arc::new(operation),
            },
        );

        Ok(())
    }

    /// Returns a handle to the operation matching `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<OperationHandle> {
        let inner = self.inner.read().ok()?;
        inner.get(name).cloned()
    }

    /// Returns the JSON Schema for `name`'s parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationNotFound`] when `name` is not registered.
    pub fn schema(&self, name: &str) -> Result<Option<Value>> {
        self.get(name)
            .map(|handle| handle.metadata().input_schema().cloned())
            .ok_or_else(|| Error::OperationNotFound {
                name: name.to_owned(),
            })
    }

    /// Invokes a registered operation directly.
    ///
    /// Validates `params` against the operation's `input_schema` (required
    /// fields and declared JSON types) before dispatching to the handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationNotFound`] when the operation is not
    /// found, [`Error::InvalidParams`] when `params` fails schema
    /// validation, or propagates whatever error the handler itself
    /// returns.
    pub async fn invoke(&self, name: &str, params: Value) -> Result<Value> {
        let handle = self.get(name).ok_or_else(|| Error::OperationNotFound {
            name: name.to_owned(),
        })?;
        validate_params(handle.metadata(), &params)?;
        handle.call(params).await
    }

    /// Lists the metadata of all registered operations, keyed by name.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn list(&self) -> HashMap<String, OperationMetadata> {
        let inner = self.inner.read().expect("operation registry poisoned");
        inner
            .iter()
            .map(|(name, handle)| (name.clone(), handle.metadata().clone()))
            .collect()
    }
}

/// Validates `params` against `metadata`'s input schema: every name in
/// `required` must be present, and any declared property with a `type`
/// must match `params`'s actual JSON type where the field is present.
fn validate_params(metadata: &OperationMetadata, params: &Value) -> Result<()> {
    let Some(schema) = metadata.input_schema().and_then(Value::as_object) else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if params.get(name).is_none() {
                return Err(Error::InvalidParams {
                    name: metadata.name().to_owned(),
                    reason: format!("missing required field `{name}`"),
                });
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (field, field_schema) in properties {
            let Some(value) = params.get(field) else {
                continue;
            };
            let Some(expected_type) = field_schema.get("type").and_then(Value::as_str) else {
                continue;
            };
            if !json_type_matches(expected_type, value) {
                return Err(Error::InvalidParams {
                    name: metadata.name().to_owned(),
                    reason: format!("field `{field}` must be of type `{expected_type}`"),
                });
            }
        }
    }

    Ok(())
}

fn json_type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}
