#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Policy enforcement and request routing for AgentMesh: the governed
//! path every KB query and agent-to-agent invocation passes through.

mod enforcement;
mod error;
mod invocation;
mod masking;
mod router;

pub use enforcement::{EnforcementPipeline, InvokeAuthorization, KbAccessOutcome};
pub use error::{Error, Result};
pub use invocation::{InvocationRecord, InvocationStatus};
pub use masking::apply_masking;
pub use router::{AgentInvokeRequest, AgentInvokeResponse, KbQueryRequest, KbQueryResponse, RequestRouter};
