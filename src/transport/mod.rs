//! Pub/sub transport boundary
//!
//! The scatter-gather layer only needs a handful of primitives from the
//! messaging fabric: publish (with or without a reply subject), subscribe,
//! inbox allocation and flush. [`NatsTransport`] provides them over a real
//! NATS connection; [`InMemoryTransport`] is an in-process broker for tests
//! and local runs.

pub mod memory;
pub mod nats;

use bytes::Bytes;

use crate::types::Result;

pub use memory::InMemoryTransport;
pub use nats::NatsTransport;

/// A message delivered on a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Subject the message was published to
    pub subject: String,
    /// Reply subject embedded by the publisher, if any
    pub reply: Option<String>,
    /// Codec bytes
    pub payload: Bytes,
}

impl Message {
    pub fn new(subject: impl Into<String>, reply: Option<String>, payload: Bytes) -> Self {
        Self {
            subject: subject.into(),
            reply,
            payload,
        }
    }
}

/// A live subscription on one subject
///
/// Messages are yielded in arrival order. `next_message` returns `None`
/// once the subscription is unsubscribed or the connection goes away.
#[async_trait::async_trait]
pub trait Subscription: Send {
    /// Subject this subscription listens on
    fn subject(&self) -> &str;

    /// Wait for the next message
    async fn next_message(&mut self) -> Option<Message>;

    /// Stop interest in the subject
    async fn unsubscribe(&mut self) -> Result<()>;
}

/// Messaging fabric primitives (allows mocking in tests)
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget publish
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Publish with a reply subject attached
    async fn publish_request(&self, subject: &str, reply_to: &str, payload: Bytes) -> Result<()>;

    /// Subscribe to a subject
    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>>;

    /// Allocate a fresh, unique reply subject
    fn new_inbox(&self) -> String;

    /// Make sure previously issued subscriptions are registered server-side
    async fn flush(&self) -> Result<()>;

    /// Close the connection. Later calls fail with a transport error.
    async fn close(&self) -> Result<()>;
}
