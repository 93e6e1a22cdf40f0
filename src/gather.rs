//! Scatter-gather request/response
//!
//! Publish one request with a fresh reply subject, then collect every reply
//! that arrives before the deadline.
//!
//! ```text
//!               /---> (responder)
//!              /
//!   (caller) ------> (responder)
//!              \
//!               \---> (responder)
//! ```
//!
//! The nested variant decodes each reply as a list: every first-level
//! responder is itself an aggregator reporting what it gathered from a
//! further fan-out level.
//!
//! ```text
//!                              /---> (leaf)
//!               /---> (aggregator) ---> (leaf)
//!   (caller) ------> (aggregator) ---> (leaf)
//!               \---> (aggregator) ---> (leaf)
//!                              \---> (leaf)
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::Codec;
use crate::transport::Transport;
use crate::types::{GatherError, Result};

/// One scatter-gather call
#[derive(Debug, Clone)]
pub struct GatherRequest {
    /// Subject the request is published to
    pub target: String,
    /// Reply subject, unique to this call
    pub reply_to: String,
    /// How long to collect replies
    pub timeout: Duration,
    /// Encoded request body
    pub payload: Bytes,
    /// Stop early once this many replies decoded
    pub max_responses: Option<usize>,
}

impl GatherRequest {
    pub fn new(target: &str, reply_to: String, timeout: Duration, payload: Bytes) -> Self {
        Self {
            target: target.to_string(),
            reply_to,
            timeout,
            payload,
            max_responses: None,
        }
    }

    pub fn with_max_responses(mut self, max: usize) -> Self {
        self.max_responses = Some(max);
        self
    }

    fn is_satisfied(&self, received: usize) -> bool {
        self.max_responses.is_some_and(|max| received >= max)
    }
}

/// Outcome of a scatter-gather call
///
/// Replies are kept in arrival order and are never deduplicated. A
/// terminal error does not discard replies gathered before it, so callers
/// should look at both fields.
#[derive(Debug)]
pub struct Gathered<T> {
    pub responses: Vec<T>,
    pub error: Option<GatherError>,
}

impl<T> Gathered<T> {
    pub fn ok(responses: Vec<T>) -> Self {
        Self {
            responses,
            error: None,
        }
    }

    /// Failure before anything could be gathered
    pub fn failed(error: GatherError) -> Self {
        Self {
            responses: Vec::new(),
            error: Some(error),
        }
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// True when the window closed without a terminal error
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_parts(self) -> (Vec<T>, Option<GatherError>) {
        (self.responses, self.error)
    }

    /// Strict view: any terminal error wins over the partial replies
    pub fn into_result(self) -> Result<Vec<T>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.responses),
        }
    }
}

/// Run one scatter-gather call
///
/// The reply subscription is registered (and flushed) before the request
/// goes out, and is released on every exit path. Decoding stops at the
/// first reply that does not decode into `T`. Cancelling `cancel` ends the
/// window early exactly like the deadline does.
pub async fn scatter_gather<C, T>(
    transport: &dyn Transport,
    codec: &C,
    request: GatherRequest,
    cancel: &CancellationToken,
) -> Gathered<T>
where
    C: Codec,
    T: DeserializeOwned,
{
    let mut subscription = match transport.subscribe(&request.reply_to).await {
        Ok(s) => s,
        Err(e) => return Gathered::failed(e),
    };

    let outcome = async {
        // The reply subscription must be live before anyone can answer
        transport.flush().await?;
        transport
            .publish_request(&request.target, &request.reply_to, request.payload.clone())
            .await?;
        debug!(
            "Published request to {} (reply: {}, window: {:?})",
            request.target, request.reply_to, request.timeout
        );
        Ok::<(), GatherError>(())
    }
    .await;

    let gathered = match outcome {
        Err(e) => Gathered::failed(e),
        Ok(()) => {
            // A window too long to represent has no deadline; only
            // cancellation or the response cap end it.
            let deadline = Instant::now().checked_add(request.timeout);
            let mut responses = Vec::new();
            let mut error = None;

            while !request.is_satisfied(responses.len()) {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("Gather on {} cancelled", request.target);
                        break;
                    }
                    next = async {
                        match deadline {
                            Some(deadline) => {
                                tokio::time::timeout_at(deadline, subscription.next_message()).await
                            }
                            None => Ok(subscription.next_message().await),
                        }
                    } => next,
                };

                match next {
                    // Window elapsed
                    Err(_) => break,
                    Ok(None) => {
                        error = Some(GatherError::Transport(format!(
                            "Reply subscription {} closed",
                            request.reply_to
                        )));
                        break;
                    }
                    Ok(Some(message)) => match codec.decode::<T>(&message.payload) {
                        Ok(response) => responses.push(response),
                        Err(e) => {
                            warn!(
                                "Undecodable reply on {} after {} responses: {}",
                                request.reply_to,
                                responses.len(),
                                e
                            );
                            error = Some(e);
                            break;
                        }
                    },
                }
            }

            debug!(
                "Gathered {} responses from {}",
                responses.len(),
                request.target
            );
            Gathered { responses, error }
        }
    };

    if let Err(e) = subscription.unsubscribe().await {
        warn!("Failed to release reply subscription {}: {}", request.reply_to, e);
    }
    gathered
}
