//! The async handler signature accepted by [`crate::MessageBus::subscribe`].

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

/// A subscription handler invoked once per message received on a subject.
///
/// Returning `Some(value)` publishes `value` as the reply when the
/// incoming message carried a reply subject (request-reply); returning
/// `None` is a fire-and-forget acknowledgement and produces no reply.
pub type BusHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Option<Value>> + Send + Sync>;

/// Wraps a closure into a [`BusHandler`].
pub fn handler<F, Fut>(f: F) -> BusHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Option<Value>> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}
