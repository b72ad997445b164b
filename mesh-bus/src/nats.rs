//! NATS-backed [`MessageBus`] implementation.
//!
//! Grounded on `original_source/adapters/messaging/nats_client.py`'s
//! `NATSWrapper`: connect/publish/subscribe/request over JSON payloads,
//! an async handler that may reply, and timeouts/transport errors on
//! `request` folding into a `None` result rather than an error.

use std::sync::Arc;
use std::time::Duration;

use async_nats::{Client, Message};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::AssertUnwindSafe;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::bus::MessageBus;
use crate::error::{Error, Result};
use crate::handler::BusHandler;

/// [`MessageBus`] implementation backed by a real NATS broker.
pub struct NatsMessageBus {
    url: String,
    client: RwLock<Option<Client>>,
}

impl NatsMessageBus {
    /// Creates a bus client targeting the given NATS server URL.
    ///
    /// Does not connect eagerly; call [`MessageBus::connect`] first.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: RwLock::new(None),
        }
    }

    async fn client(&self) -> Result<Client> {
        self.client
            .read()
            .await
            .clone()
            .ok_or(Error::NotConnected)
    }
}

#[async_trait]
impl MessageBus for NatsMessageBus {
    async fn connect(&self) -> Result<()> {
        if self.client.read().await.is_some() {
            return Ok(());
        }

        let client = async_nats::connect(self.url.as_str())
            .await
            .map_err(|err| Error::Connect(err.to_string()))?;
        info!(url = %self.url, "connected to NATS");
        *self.client.write().await = Some(client);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(client) = self.client.write().await.take() {
            client
                .drain()
                .await
                .map_err(|err| Error::Transport(err.to_string()))?;
            info!("disconnected from NATS");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client
            .try_read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    async fn publish(&self, subject: &str, payload: Value) -> Result<()> {
        let client = self.client().await?;
        let bytes = Bytes::from(serde_json::to_vec(&payload)?);
        client
            .publish(subject.to_owned(), bytes)
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;
        debug!(subject, "published message");
        Ok(())
    }

    async fn subscribe(&self, subject: &str, handler: BusHandler) -> Result<()> {
        let client = self.client().await?;
        let mut subscriber = client
            .subscribe(subject.to_owned())
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;
        info!(subject, "subscribed");

        let subject_owned = subject.to_owned();
        let client_for_replies = client.clone();
        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                handle_message(&client_for_replies, &subject_owned, message, handler.clone()).await;
            }
        });
        Ok(())
    }

    async fn request(
        &self,
        subject: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Option<Value>> {
        let client = self.client().await?;
        let bytes = Bytes::from(serde_json::to_vec(&payload)?);

        match tokio::time::timeout(timeout, client.request(subject.to_owned(), bytes)).await {
            Ok(Ok(response)) => match serde_json::from_slice::<Value>(&response.payload) {
                Ok(value) => Ok(Some(value)),
                Err(err) => {
                    warn!(subject, error = %err, "request reply was not valid JSON");
                    Ok(None)
                }
            },
            Ok(Err(err)) => {
                warn!(subject, error = %err, "request failed");
                Ok(None)
            }
            Err(_) => {
                warn!(subject, timeout_ms = timeout.as_millis(), "request timed out");
                Ok(None)
            }
        }
    }
}

async fn handle_message(client: &Client, subject: &str, message: Message, handler: BusHandler) {
    let reply = message.reply.clone();

    let payload = match serde_json::from_slice::<Value>(&message.payload) {
        Ok(value) => value,
        Err(err) => {
            error!(subject, error = %err, "failed to decode bus message");
            if let Some(reply) = reply {
                publish_error(client, reply.as_str(), &err.to_string()).await;
            }
            return;
        }
    };

    let outcome = AssertUnwindSafe(handler(payload)).catch_unwind().await;

    match outcome {
        Ok(Some(value)) => {
            if let Some(reply) = reply {
                publish_reply(client, reply.as_str(), value).await;
            }
        }
        Ok(None) => {}
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_owned());
            error!(subject, error = %message, "bus handler panicked");
            if let Some(reply) = reply {
                publish_error(client, reply.as_str(), &message).await;
            }
        }
    }
}

async fn publish_reply(client: &Client, reply: &str, value: Value) {
    match serde_json::to_vec(&value) {
        Ok(bytes) => {
            if let Err(err) = client.publish(reply.to_owned(), Bytes::from(bytes)).await {
                error!(reply, error = %err, "failed to publish reply");
            }
        }
        Err(err) => publish_error(client, reply, &err.to_string()).await,
    }
}

async fn publish_error(client: &Client, reply: &str, message: &str) {
    let body = serde_json::json!({ "status": "error", "error": message });
    if let Ok(bytes) = serde_json::to_vec(&body) {
        let _ = client.publish(reply.to_owned(), Bytes::from(bytes)).await;
    }
}
