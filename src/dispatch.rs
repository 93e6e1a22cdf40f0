//! Delivery task for persistent subscriptions
//!
//! Drains one subscription on its own tokio task and hands every message to
//! a handler, one at a time, in arrival order. A handler that does not
//! return stalls delivery for that subscription only.

use std::future::Future;
use std::ops::ControlFlow;
use tracing::{debug, warn};

use crate::registry::SubscriptionHandle;
use crate::transport::{Message, Subscription};

/// Spawn the delivery task for `subscription`
///
/// The task ends when the handler breaks, the subscription ends, or
/// [`SubscriptionHandle::stop`] is called. It always unsubscribes on the
/// way out and then marks the handle finished.
pub fn spawn<H, Fut>(mut subscription: Box<dyn Subscription>, mut handler: H) -> SubscriptionHandle
where
    H: FnMut(Message) -> Fut + Send + 'static,
    Fut: Future<Output = ControlFlow<()>> + Send + 'static,
{
    let handle = SubscriptionHandle::new(subscription.subject());
    let shutdown = handle.shutdown_token();
    let finished = handle.finished_token();
    let id = handle.id();

    tokio::spawn(async move {
        let _finished = finished.drop_guard();
        let subject = subscription.subject().to_string();
        debug!("Delivery task {} started on {}", id, subject);

        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                message = subscription.next_message() => message,
            };

            let Some(message) = message else {
                debug!("Subscription {} on {} ended", id, subject);
                break;
            };

            let flow = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                flow = handler(message) => flow,
            };
            if flow.is_break() {
                break;
            }
        }

        if let Err(e) = subscription.unsubscribe().await {
            warn!("Failed to unsubscribe {} from {}: {}", id, subject, e);
        }
        debug!("Delivery task {} on {} stopped", id, subject);
    });

    handle
}
