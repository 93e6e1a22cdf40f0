//! Push-style stream subscriptions
//!
//! Every message on a subject is decoded and forwarded to a caller-owned
//! channel. Undecodable messages are logged and skipped; the stream keeps
//! going. The subscription ends when the receiving side of the channel is
//! dropped.
//!
//! Backpressure: delivery waits for the sink. With a bounded
//! `mpsc::Sender` that nobody drains, the delivery task for that subject
//! blocks and further messages queue up behind it in the transport. Keep
//! the receiver moving, or use an unbounded sender.

use serde::de::DeserializeOwned;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::codec::Codec;
use crate::dispatch;
use crate::registry::SubscriptionHandle;
use crate::transport::{Message, Subscription};

/// Destination for decoded stream values
#[async_trait::async_trait]
pub trait Delivery<T: Send + 'static>: Send + Sync + 'static {
    /// Hand over one value. `false` means the receiver is gone.
    async fn deliver(&self, value: T) -> bool;
}

#[async_trait::async_trait]
impl<T: Send + 'static> Delivery<T> for mpsc::Sender<T> {
    async fn deliver(&self, value: T) -> bool {
        self.send(value).await.is_ok()
    }
}

#[async_trait::async_trait]
impl<T: Send + 'static> Delivery<T> for mpsc::UnboundedSender<T> {
    async fn deliver(&self, value: T) -> bool {
        self.send(value).is_ok()
    }
}

/// Forward every decodable message on `subscription` to `sink`
pub fn spawn_stream<C, T, D>(subscription: Box<dyn Subscription>, codec: C, sink: D) -> SubscriptionHandle
where
    C: Codec,
    T: DeserializeOwned + Send + 'static,
    D: Delivery<T>,
{
    let sink = Arc::new(sink);

    dispatch::spawn(subscription, move |message: Message| {
        let sink = Arc::clone(&sink);
        let decoded = codec.decode::<T>(&message.payload);
        async move {
            match decoded {
                Ok(value) => {
                    if !sink.deliver(value).await {
                        info!("Receiver for {} dropped, ending stream", message.subject);
                        return ControlFlow::Break(());
                    }
                }
                Err(e) => warn!("Skipping undecodable message on {}: {}", message.subject, e),
            }
            ControlFlow::Continue(())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::transport::{InMemoryTransport, Transport};
    use bytes::Bytes;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Tick {
        seq: u32,
    }

    #[tokio::test]
    async fn test_bad_messages_are_skipped() {
        let transport = InMemoryTransport::new();
        let subscription = transport.subscribe("ticks").await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel::<Tick>();
        let _handle = spawn_stream(subscription, JsonCodec, tx);

        for body in [
            &br#"{"seq":1}"#[..],
            &b"not json"[..],
            &br#"{"seq":"two"}"#[..],
            &br#"{"seq":3}"#[..],
        ] {
            transport
                .publish("ticks", Bytes::copy_from_slice(body))
                .await
                .unwrap();
        }

        assert_eq!(rx.recv().await.unwrap(), Tick { seq: 1 });
        assert_eq!(rx.recv().await.unwrap(), Tick { seq: 3 });
    }

    #[tokio::test]
    async fn test_dropped_receiver_ends_subscription() {
        let transport = InMemoryTransport::new();
        let subscription = transport.subscribe("ticks").await.unwrap();
        let (tx, rx) = mpsc::channel::<Tick>(4);
        let handle = spawn_stream(subscription, JsonCodec, tx);

        drop(rx);
        transport
            .publish("ticks", Bytes::from_static(br#"{"seq":1}"#))
            .await
            .unwrap();

        handle.closed().await;
        assert_eq!(transport.subscriber_count("ticks").await, 0);
    }

    #[tokio::test]
    async fn test_full_bounded_sink_holds_delivery() {
        let transport = InMemoryTransport::new();
        let subscription = transport.subscribe("ticks").await.unwrap();
        let (tx, mut rx) = mpsc::channel::<Tick>(1);
        let _handle = spawn_stream(subscription, JsonCodec, tx);

        for seq in 1..=3u32 {
            let body = format!(r#"{{"seq":{}}}"#, seq);
            transport.publish("ticks", Bytes::from(body)).await.unwrap();
        }

        // Nothing is lost while the sink is full, delivery just waits
        for seq in 1..=3u32 {
            assert_eq!(rx.recv().await.unwrap(), Tick { seq });
        }
    }
}
