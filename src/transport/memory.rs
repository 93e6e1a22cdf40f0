//! In-process transport
//!
//! A minimal broker that routes by exact subject match. Each subscription
//! owns an unbounded queue, so delivery order per subscription is publish
//! order. Clones share the same broker, which lets several clients talk to
//! each other without a NATS server.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use super::{Message, Subscription, Transport};
use crate::types::{GatherError, Result};

/// Prefix for generated reply subjects
pub const INBOX_PREFIX: &str = "_INBOX";

struct Subscriber {
    sid: u64,
    sender: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct Broker {
    subjects: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_sid: AtomicU64,
    closed: AtomicBool,
}

impl Broker {
    async fn route(&self, message: Message) -> usize {
        let mut subjects = self.subjects.write().await;
        let Some(subscribers) = subjects.get_mut(&message.subject) else {
            return 0;
        };

        // Drop receivers that went away without unsubscribing
        subscribers.retain(|s| !s.sender.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            if subscriber.sender.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        if subscribers.is_empty() {
            subjects.remove(&message.subject);
        }
        delivered
    }

    async fn remove(&self, subject: &str, sid: u64) {
        let mut subjects = self.subjects.write().await;
        if let Some(subscribers) = subjects.get_mut(subject) {
            subscribers.retain(|s| s.sid != sid);
            if subscribers.is_empty() {
                subjects.remove(subject);
            }
        }
    }
}

/// In-memory implementation of [`Transport`]
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    broker: Arc<Broker>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `subject`
    pub async fn subscriber_count(&self, subject: &str) -> usize {
        self.broker
            .subjects
            .read()
            .await
            .get(subject)
            .map(|subs| subs.iter().filter(|s| !s.sender.is_closed()).count())
            .unwrap_or(0)
    }

    /// Total live subscriptions across all subjects
    pub async fn total_subscriptions(&self) -> usize {
        self.broker
            .subjects
            .read()
            .await
            .values()
            .flat_map(|subs| subs.iter())
            .filter(|s| !s.sender.is_closed())
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.broker.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(GatherError::Transport("connection closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        let delivered = self
            .broker
            .route(Message::new(subject, None, payload))
            .await;
        debug!("Published to {} ({} subscribers)", subject, delivered);
        Ok(())
    }

    async fn publish_request(&self, subject: &str, reply_to: &str, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        let delivered = self
            .broker
            .route(Message::new(subject, Some(reply_to.to_string()), payload))
            .await;
        debug!(
            "Published request to {} with reply {} ({} subscribers)",
            subject, reply_to, delivered
        );
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>> {
        self.ensure_open()?;
        let sid = self.broker.next_sid.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        self.broker
            .subjects
            .write()
            .await
            .entry(subject.to_string())
            .or_default()
            .push(Subscriber { sid, sender });

        Ok(Box::new(MemorySubscription {
            subject: subject.to_string(),
            sid,
            receiver,
            broker: Arc::clone(&self.broker),
        }))
    }

    fn new_inbox(&self) -> String {
        format!("{}.{}", INBOX_PREFIX, uuid::Uuid::new_v4().simple())
    }

    async fn flush(&self) -> Result<()> {
        // Subscriptions are registered synchronously in subscribe()
        self.ensure_open()
    }

    async fn close(&self) -> Result<()> {
        if self.broker.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Dropping the senders ends every open subscription
        self.broker.subjects.write().await.clear();
        Ok(())
    }
}

struct MemorySubscription {
    subject: String,
    sid: u64,
    receiver: mpsc::UnboundedReceiver<Message>,
    broker: Arc<Broker>,
}

#[async_trait::async_trait]
impl Subscription for MemorySubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    async fn next_message(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.receiver.close();
        self.broker.remove(&self.subject, self.sid).await;
        Ok(())
    }
}
