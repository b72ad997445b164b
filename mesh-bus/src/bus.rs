//! The [`MessageBus`] trait implemented by NATS and in-process backends.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::handler::BusHandler;

/// Single-process wrapper over a subject-addressed broker.
///
/// Offers publish-only, subscribe-with-callback, and synchronous
/// request-reply. Every payload crossing the boundary is a JSON object.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Connects to the broker. Idempotent: calling twice while already
    /// connected is a no-op.
    async fn connect(&self) -> Result<()>;

    /// Drains in-flight work and closes the connection.
    async fn disconnect(&self) -> Result<()>;

    /// Returns whether the client currently considers itself connected.
    fn is_connected(&self) -> bool;

    /// Publishes `payload` to `subject`, fire-and-forget.
    async fn publish(&self, subject: &str, payload: Value) -> Result<()>;

    /// Registers `handler` to run once per message received on `subject`.
    ///
    /// When a message carries a reply subject and the handler returns
    /// `Some(value)`, `value` is published to that reply subject. Decode
    /// failures and handler panics are caught and turned into
    /// `{"status": "error", "error": "..."}` replies rather than dropped
    /// silently, matching the request-reply contract callers rely on.
    async fn subscribe(&self, subject: &str, handler: BusHandler) -> Result<()>;

    /// Publishes `payload` to `subject` and awaits a single reply on a
    /// broker-assigned inbox.
    ///
    /// Returns `Ok(None)` on timeout or transport failure — a
    /// distinguished "no reply" outcome separate from an explicit error
    /// reply, which arrives as `Ok(Some(value))` with `value` carrying
    /// whatever error shape the responder chose to send.
    async fn request(&self, subject: &str, payload: Value, timeout: Duration) -> Result<Option<Value>>;
}
