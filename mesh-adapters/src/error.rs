//! Errors raised by KB adapters.

use thiserror::Error;

/// Result alias used throughout `mesh-adapters`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`crate::KbAdapter`] implementations.
#[derive(Debug, Error)]
pub enum Error {
    /// The adapter could not establish or lost its connection to the KB.
    #[error("adapter connection error: {0}")]
    Connection(String),

    /// The requested operation is not registered, or the handler failed.
    #[error(transparent)]
    Operation(#[from] mesh_operations::Error),

    /// Subscribing to the adapter's bus subject failed.
    #[error(transparent)]
    Bus(#[from] mesh_bus::Error),
}
