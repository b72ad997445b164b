//! In-process [`MessageBus`] substitute for a live NATS broker, used by
//! integration tests (see `spec.md` §8 scenarios S1-S6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::bus::MessageBus;
use crate::error::Result;
use crate::handler::BusHandler;

/// In-memory message bus. Publishes are delivered synchronously to every
/// handler registered on the subject; `request` invokes the first
/// registered handler directly and returns its reply.
#[derive(Clone, Default)]
pub struct LocalMessageBus {
    connected: Arc<AtomicBool>,
    handlers: Arc<RwLock<HashMap<String, Vec<BusHandler>>>>,
}

impl LocalMessageBus {
    /// Creates an empty local bus, not yet connected.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBus for LocalMessageBus {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.handlers.write().await.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, subject: &str, payload: Value) -> Result<()> {
        let handlers = self.handlers.read().await;
        let Some(subscribers) = handlers.get(subject) else {
            debug!(subject, "publish with no subscribers");
            return Ok(());
        };

        for handler in subscribers.clone() {
            let payload = payload.clone();
            tokio::spawn(async move {
                let _ = handler(payload).await;
            });
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str, handler: BusHandler) -> Result<()> {
        self.handlers
            .write()
            .await
            .entry(subject.to_owned())
            .or_default()
            .push(handler);
        Ok(())
    }

    async fn request(
        &self,
        subject: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Option<Value>> {
        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(subject).and_then(|subs| subs.first().cloned())
        };

        let Some(handler) = handler else {
            warn!(subject, "request with no subscriber, returning no reply");
            return Ok(None);
        };

        match tokio::time::timeout(timeout, handler(payload)).await {
            Ok(value) => Ok(value),
            Err(_) => {
                warn!(subject, timeout_ms = timeout.as_millis(), "request timed out");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler;
    use serde_json::json;

    #[tokio::test]
    async fn request_reply_round_trips_through_handler() {
        let bus = LocalMessageBus::new();
        bus.connect().await.unwrap();
        bus.subscribe(
            "mesh.test.echo",
            handler(|payload| async move { Some(payload) }),
        )
        .await
        .unwrap();

        let reply = bus
            .request("mesh.test.echo", json!({"ping": true}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, Some(json!({"ping": true})));
    }

    #[tokio::test]
    async fn request_without_subscriber_returns_none() {
        let bus = LocalMessageBus::new();
        bus.connect().await.unwrap();
        let reply = bus
            .request("mesh.test.nobody", json!({}), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn publish_delivers_to_all_subscribers() {
        let bus = LocalMessageBus::new();
        bus.connect().await.unwrap();
        let counter = Arc::new(tokio::sync::Mutex::new(0u32));

        for _ in 0..3 {
            let counter = counter.clone();
            bus.subscribe(
                "mesh.test.fanout",
                handler(move |_payload| {
                    let counter = counter.clone();
                    async move {
                        *counter.lock().await += 1;
                        None
                    }
                }),
            )
            .await
            .unwrap();
        }

        bus.publish("mesh.test.fanout", json!({})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*counter.lock().await, 3);
    }
}
