//! Errors raised by message bus clients.

use thiserror::Error;

/// Result alias used throughout `mesh-bus`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`crate::MessageBus`] implementations.
#[derive(Debug, Error)]
pub enum Error {
    /// The bus is not connected.
    #[error("message bus is not connected")]
    NotConnected,

    /// Connecting to the broker failed.
    #[error("failed to connect to message bus: {0}")]
    Connect(String),

    /// A publish, subscribe, or request call failed at the transport layer.
    #[error("message bus transport error: {0}")]
    Transport(String),

    /// A payload failed to serialize to JSON before being sent.
    #[error("failed to encode bus payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The subject name was empty or otherwise invalid.
    #[error("invalid subject: {0}")]
    InvalidSubject(String),
}
