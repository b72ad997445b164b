//! Errors raised by policy decision clients.
//!
//! Note that [`crate::PolicyDecisionClient::evaluate`] never returns an
//! `Err`: every failure mode folds into a safe-default deny decision. This
//! error type is for the administrative surface only (health, list/upload/
//! delete/get-content), where callers are operational tooling rather than
//! the enforcement hot path.

use thiserror::Error;

/// Result alias used by the administrative policy client surface.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by policy decision client administrative operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The decision service returned a non-2xx status.
    #[error("policy service returned status {status}: {body}")]
    Status {
        /// HTTP status code returned by the service.
        status: u16,
        /// Response body, truncated for logging.
        body: String,
    },

    /// The request could not be sent or the response could not be read.
    #[error("policy service transport error: {0}")]
    Transport(String),

    /// The response body was not valid JSON or did not match the expected shape.
    #[error("policy service returned malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The request exceeded its configured timeout.
    #[error("policy service request timed out")]
    Timeout,

    /// The operation is not supported by this client implementation.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// A local filesystem operation (policy text persistence) failed.
    #[error("policy file operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// The underlying persistence store rejected the operation.
    #[error("store error: {0}")]
    Store(#[from] mesh_store::Error),
}
