//! Errors raised by the enforcement pipeline and request router.

use thiserror::Error;

/// Result alias used throughout `mesh-router`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`crate::EnforcementPipeline`] and [`crate::RequestRouter`].
#[derive(Debug, Error)]
pub enum Error {
    /// Policy evaluation denied the request.
    #[error("access denied: {reason}")]
    AccessDenied {
        /// Reason reported by the policy decision.
        reason: String,
    },

    /// The target KB is not registered.
    #[error("KB '{kb_id}' not found in registry")]
    KbNotFound {
        /// The missing KB identifier.
        kb_id: String,
    },

    /// The target agent is not registered.
    #[error("agent '{identity}' not found in registry")]
    AgentNotFound {
        /// The missing agent identity.
        identity: String,
    },

    /// No adapter is registered for the KB's declared type.
    #[error("no adapter registered for KB type '{kb_type}'")]
    UnsupportedKbType {
        /// The KB type with no matching adapter.
        kb_type: String,
    },

    /// The underlying persistence store failed.
    #[error(transparent)]
    Store(#[from] mesh_store::Error),

    /// A bus publish or subscribe failed.
    #[error(transparent)]
    Bus(#[from] mesh_bus::Error),

    /// The KB adapter rejected or failed the dispatched operation.
    #[error(transparent)]
    Adapter(#[from] mesh_adapters::Error),
}
