//! Responders
//!
//! Persistent subscriptions that answer every request on a subject by
//! publishing to the request's reply subject. Two flavours:
//!
//! - fixed answer: the value captured at registration is sent back for
//!   every request, whatever the request contains
//! - computed answer: each request is decoded, handed to a handler, and the
//!   handler's result is sent back
//!
//! Problems inside a running responder (no reply subject, undecodable
//! request, handler error, publish failure) are logged and the request is
//! dropped. Registration already succeeded, so there is no caller to
//! report them to.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::codec::Codec;
use crate::dispatch;
use crate::registry::SubscriptionHandle;
use crate::transport::{Message, Subscription, Transport};

/// Answer every request on `subscription` with `data`
pub fn spawn_fixed<C, R>(
    subscription: Box<dyn Subscription>,
    transport: Arc<dyn Transport>,
    codec: C,
    data: R,
) -> SubscriptionHandle
where
    C: Codec,
    R: Serialize + Send + Sync + 'static,
{
    let data = Arc::new(data);

    dispatch::spawn(subscription, move |message: Message| {
        let transport = Arc::clone(&transport);
        let reply = encode_reply(&codec, &message, &*data);
        async move {
            if let Some((reply_to, body)) = reply {
                publish_reply(&*transport, &reply_to, body).await;
            }
            ControlFlow::Continue(())
        }
    })
}

/// Decode each request on `subscription`, run `handler`, reply with its
/// result
pub fn spawn_computed<C, Req, Resp, E, F, Fut>(
    subscription: Box<dyn Subscription>,
    transport: Arc<dyn Transport>,
    codec: C,
    handler: F,
) -> SubscriptionHandle
where
    C: Codec,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    E: Display + Send + 'static,
    F: Fn(Req) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Resp, E>> + Send + 'static,
{
    dispatch::spawn(subscription, move |message: Message| {
        let transport = Arc::clone(&transport);
        let codec = codec.clone();

        let pending = match codec.decode::<Req>(&message.payload) {
            Ok(request) => Some(handler(request)),
            Err(e) => {
                warn!("Dropping undecodable request on {}: {}", message.subject, e);
                None
            }
        };

        async move {
            let Some(pending) = pending else {
                return ControlFlow::Continue(());
            };
            match pending.await {
                Ok(response) => {
                    if let Some((reply_to, body)) = encode_reply(&codec, &message, &response) {
                        publish_reply(&*transport, &reply_to, body).await;
                    }
                }
                Err(e) => warn!("Handler for {} failed, not replying: {}", message.subject, e),
            }
            ControlFlow::Continue(())
        }
    })
}

/// Reply subject and encoded body, or `None` if there is nothing to send
fn encode_reply<C, R>(codec: &C, message: &Message, response: &R) -> Option<(String, Bytes)>
where
    C: Codec,
    R: Serialize + ?Sized,
{
    let Some(reply_to) = message.reply.clone() else {
        warn!("Request on {} has no reply subject, dropping", message.subject);
        return None;
    };

    match codec.encode(response) {
        Ok(body) => Some((reply_to, body)),
        Err(e) => {
            error!("Failed to encode response for {}: {}", message.subject, e);
            None
        }
    }
}

async fn publish_reply(transport: &dyn Transport, reply_to: &str, body: Bytes) {
    if let Err(e) = transport.publish(reply_to, body).await {
        error!("Failed to publish response to {}: {}", reply_to, e);
    } else {
        debug!("Published response to {}", reply_to);
    }
}
