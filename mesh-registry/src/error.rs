//! Errors raised by the registry services.

use thiserror::Error;

/// Result alias used throughout `mesh-registry`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`crate::AgentService`], [`crate::KbService`], and
/// [`crate::DirectoryService`].
#[derive(Debug, Error)]
pub enum Error {
    /// A registration field failed validation.
    #[error("validation error in '{field}': {message}")]
    Validation {
        /// Name of the offending field.
        field: String,
        /// Human-readable reason for rejection.
        message: String,
        /// Optional corrective suggestion surfaced to the caller.
        suggestion: Option<String>,
    },

    /// An agent with this identity is already registered.
    #[error("agent with identity '{identity}' already exists")]
    DuplicateIdentity {
        /// The colliding identity.
        identity: String,
    },

    /// A KB with this id is already registered.
    #[error("KB with id '{kb_id}' already exists")]
    DuplicateKb {
        /// The colliding KB id.
        kb_id: String,
    },

    /// The requested `kb_type` is not one of the supported families.
    #[error("KB type '{kb_type}' is not supported; supported types: {supported}")]
    UnsupportedKbType {
        /// The rejected type.
        kb_type: String,
        /// Comma-joined list of supported types.
        supported: String,
    },

    /// An operation name is not valid for the entity's declared type.
    #[error("operation '{operation}' is not valid; allowed operations: {allowed}")]
    InvalidOperation {
        /// The rejected operation name.
        operation: String,
        /// Comma-joined list of allowed operation names.
        allowed: String,
    },

    /// The requested entity does not exist.
    #[error("{entity_type} with id '{entity_id}' not found")]
    NotFound {
        /// `"Agent"` or `"KB"`.
        entity_type: &'static str,
        /// The missing identifier.
        entity_id: String,
    },

    /// The underlying persistence store failed.
    #[error(transparent)]
    Store(#[from] mesh_store::Error),

    /// Publishing a directory change notification failed.
    #[error(transparent)]
    Bus(#[from] mesh_bus::Error),
}

impl Error {
    /// Builds a [`Error::Validation`] with an optional suggestion.
    #[must_use]
    pub fn validation(
        field: impl Into<String>,
        message: impl Into<String>,
        suggestion: Option<&str>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
            suggestion: suggestion.map(str::to_owned),
        }
    }
}
