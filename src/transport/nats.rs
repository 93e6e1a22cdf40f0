//! NATS transport
//!
//! Provides connection management with credentials and keep-alive on top
//! of `async_nats::Client`.

use async_nats::{Client, ConnectOptions};
use bytes::Bytes;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use super::{Message, Subscription, Transport};
use crate::config::ClientConfig;
use crate::types::{GatherError, Result};

/// NATS connection implementing [`Transport`]
pub struct NatsTransport {
    /// Underlying NATS client
    client: Client,
    /// Client name for logging
    name: String,
    closed: AtomicBool,
}

impl NatsTransport {
    /// Connect to the NATS server described by `config`
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        info!("Connecting to NATS at {}", config.nats_url);

        // No retry_on_initial_connect(): fail fast if NATS isn't there.
        // Reconnection still works after the first successful connect.
        let mut options = ConnectOptions::new()
            .name(&config.name)
            .ping_interval(config.ping_interval)
            .connection_timeout(config.connect_timeout);

        if let (Some(user), Some(pass)) = (&config.user, &config.password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&config.nats_url)
            .await
            .map_err(|e| GatherError::Transport(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {} as {}", config.nats_url, config.name);

        Ok(Self::from_client(client, &config.name))
    }

    /// Wrap an already connected client
    pub fn from_client(client: Client, name: &str) -> Self {
        Self {
            client,
            name: name.to_string(),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the underlying NATS client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the client name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatherError::Transport("connection closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| GatherError::Transport(format!("Publish failed: {}", e)))
    }

    async fn publish_request(&self, subject: &str, reply_to: &str, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.client
            .publish_with_reply(subject.to_string(), reply_to.to_string(), payload)
            .await
            .map_err(|e| GatherError::Transport(format!("Publish request failed: {}", e)))
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>> {
        self.ensure_open()?;
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| GatherError::Transport(format!("Subscribe failed: {}", e)))?;

        debug!("Subscribed to {}", subject);
        Ok(Box::new(NatsSubscription {
            subject: subject.to_string(),
            subscriber: Some(subscriber),
        }))
    }

    fn new_inbox(&self) -> String {
        self.client.new_inbox()
    }

    async fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.client
            .flush()
            .await
            .map_err(|e| GatherError::Transport(format!("Flush failed: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Drain closes the socket even while other clones of the client exist
        self.client
            .drain()
            .await
            .map_err(|e| GatherError::Transport(format!("Drain on close failed: {}", e)))?;
        info!("NATS client {} drained and closed", self.name);
        Ok(())
    }
}

/// Subscription backed by an `async_nats::Subscriber`
struct NatsSubscription {
    subject: String,
    /// `None` once unsubscribed
    subscriber: Option<async_nats::Subscriber>,
}

#[async_trait::async_trait]
impl Subscription for NatsSubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    async fn next_message(&mut self) -> Option<Message> {
        let msg = self.subscriber.as_mut()?.next().await?;
        Some(Message {
            subject: msg.subject.to_string(),
            reply: msg.reply.map(|r| r.to_string()),
            payload: msg.payload,
        })
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        if let Some(mut subscriber) = self.subscriber.take() {
            subscriber
                .unsubscribe()
                .await
                .map_err(|e| GatherError::Transport(format!("Unsubscribe failed: {}", e)))?;
            debug!("Unsubscribed from {}", self.subject);
        }
        Ok(())
    }
}
