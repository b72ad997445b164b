//! Errors raised by the persistence store.

use thiserror::Error;

/// Result alias used throughout `mesh-store`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while opening or querying the store.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to open the database connection or its parent directory.
    #[error("failed to connect to store: {0}")]
    Connection(String),

    /// A migration failed to apply.
    #[error("migration {version} failed: {message}")]
    Migration {
        /// The migration version that failed.
        version: i64,
        /// Human-readable failure detail.
        message: String,
    },

    /// An insert violated a unique constraint (`identity`, `kb_id`, or
    /// `policy_name`).
    #[error("duplicate record: {0}")]
    DuplicateRecord(String),

    /// The underlying SQL query failed.
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// A JSON column failed to (de)serialize.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored timestamp was not valid ISO-8601.
    #[error("invalid timestamp `{0}`")]
    InvalidTimestamp(String),

    /// A stored wildcard pattern failed to compile.
    #[error("invalid policy pattern: {0}")]
    InvalidPattern(#[from] mesh_primitives::Error),

    /// A stored `status` column held an unrecognized value.
    #[error("invalid health status `{0}`")]
    InvalidStatus(String),
}
