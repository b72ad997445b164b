//! The [`PolicyDecisionClient`] trait implemented by both the remote HTTP
//! client and the local fallback evaluator.

use async_trait::async_trait;

use crate::contracts::PolicyRequest;
use crate::decision::PolicyDecision;
use crate::error::Result;

/// Evaluates governed requests against an authoritative policy source.
///
/// Implementations MUST treat `evaluate` as infallible from the caller's
/// perspective: every failure mode (timeout, transport error, malformed
/// response, backend outage) is folded into [`PolicyDecision::deny`] rather
/// than surfaced as an error, so the enforcement pipeline always has a
/// decision to act on.
#[async_trait]
pub trait PolicyDecisionClient: Send + Sync {
    /// Evaluates the supplied request, never failing.
    async fn evaluate(&self, request: &PolicyRequest) -> PolicyDecision;

    /// Probes whether the backing policy source is reachable and healthy.
    async fn health(&self) -> bool;

    /// Lists the names of policies currently loaded by the backing source.
    async fn list_policies(&self) -> Result<Vec<String>>;

    /// Uploads (creates or replaces) a named policy document.
    async fn upload_policy(&self, name: &str, content: &str) -> Result<()>;

    /// Deletes a named policy document.
    async fn delete_policy(&self, name: &str) -> Result<()>;

    /// Returns the raw text of a named policy document.
    async fn get_policy_content(&self, name: &str) -> Result<String>;
}
