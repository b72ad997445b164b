#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Error types, validation helpers, and concurrency primitives shared
//! across the AgentMesh control plane crates.

mod error;
mod pattern;
mod scheduler;
mod validate;

pub use error::{Error, Result};
pub use pattern::WildcardPattern;
pub use scheduler::{SchedulerConfig, SchedulerError, TaskScheduler};
pub use validate::{validate_http_url, validate_semver};
