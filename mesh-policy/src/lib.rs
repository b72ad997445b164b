#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Policy decision contracts and clients for the AgentMesh control plane.
//!
//! [`PolicyDecisionClient`] is the single seam the enforcement pipeline
//! evaluates against. [`HttpPolicyClient`] talks to an external decision
//! service (OPA-style) and is authoritative whenever `mesh-config` carries
//! a decision service URL; [`LocalPolicyClient`] delegates to
//! `mesh-store`'s in-process wildcard evaluator otherwise.

mod client;
mod contracts;
mod decision;
mod error;
mod http;
mod local;

pub use client::PolicyDecisionClient;
pub use contracts::PolicyRequest;
pub use decision::PolicyDecision;
pub use error::{Error, Result};
pub use http::HttpPolicyClient;
pub use local::LocalPolicyClient;
