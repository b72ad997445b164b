//! Shared error definitions for the AgentMesh control plane.

use thiserror::Error;

/// Result alias used throughout `mesh-primitives`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing or validating shared types.
#[derive(Debug, Error)]
pub enum Error {
    /// A version string did not match the semantic-version pattern.
    #[error("invalid version `{version}`: does not match semantic version pattern")]
    InvalidVersion {
        /// The offending version string.
        version: String,
    },

    /// A URL failed basic well-formedness validation.
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl {
        /// The offending URL string.
        url: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// A wildcard pattern could not be compiled.
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern {
        /// The offending pattern string.
        pattern: String,
        /// Human-readable reason for rejection.
        reason: String,
    },
}
