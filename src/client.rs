//! Client facade
//!
//! A [`Client`] owns one transport connection and the registry of
//! persistent subscriptions made through it. It is cheap to clone; clones
//! share the connection and the registry. After [`Client::close`] every
//! operation fails with [`GatherError::Closed`].

use futures_util::future::join_all;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::codec::{Codec, JsonCodec};
use crate::config::{ClientConfig, NatsArgs};
use crate::gather::{scatter_gather, GatherRequest, Gathered};
use crate::registry::{SubscriptionHandle, SubscriptionRegistry};
use crate::responder;
use crate::stream::{self, Delivery};
use crate::transport::{NatsTransport, Subscription, Transport};
use crate::types::{GatherError, Result};

/// Scatter-gather client
#[derive(Clone)]
pub struct Client<C: Codec = JsonCodec> {
    inner: Arc<ClientInner<C>>,
}

struct ClientInner<C> {
    transport: Arc<dyn Transport>,
    registry: SubscriptionRegistry,
    codec: C,
    config: ClientConfig,
    closed: AtomicBool,
}

impl Client<JsonCodec> {
    /// Connect to NATS using CLI/env arguments
    pub async fn open(args: &NatsArgs) -> Result<Self> {
        Self::connect(args.client_config()).await
    }

    /// Connect to NATS with an explicit configuration
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let transport = NatsTransport::connect(&config).await?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Build a client over any transport (in-memory broker, mocks)
    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self::with_codec(transport, config, JsonCodec)
    }
}

impl<C: Codec> Client<C> {
    /// Build a client with a non-default codec
    pub fn with_codec(transport: Arc<dyn Transport>, config: ClientConfig, codec: C) -> Self {
        debug!("Client {} using {} codec", config.name, codec.name());
        Self {
            inner: Arc::new(ClientInner {
                transport,
                registry: SubscriptionRegistry::new(),
                codec,
                config,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn codec(&self) -> &C {
        &self.inner.codec
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop every persistent subscription and close the connection
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let stopped = self.inner.registry.shutdown_all().await;
        // Every delivery task unsubscribes before the connection goes away
        join_all(stopped.iter().map(|handle| handle.closed())).await;
        info!(
            "Closing client {} ({} subscriptions stopped)",
            self.inner.config.name,
            stopped.len()
        );
        self.inner.transport.close().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(GatherError::Closed);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scatter-gather
    // ------------------------------------------------------------------

    /// Publish `payload` to `subject` and collect every reply decoded as
    /// `T` until `timeout` elapses
    ///
    /// Zero responders is not an error. A reply that fails to decode ends
    /// the window; replies decoded before it are still returned.
    pub async fn gather<Req, T>(&self, subject: &str, payload: &Req, timeout: Duration) -> Gathered<T>
    where
        Req: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.gather_with_cancel(subject, payload, timeout, &CancellationToken::new())
            .await
    }

    /// [`Client::gather`] that also ends when `cancel` fires
    pub async fn gather_with_cancel<Req, T>(
        &self,
        subject: &str,
        payload: &Req,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Gathered<T>
    where
        Req: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.run_gather(subject, payload, timeout, None, cancel).await
    }

    /// [`Client::gather`] that returns as soon as `max` replies decoded
    pub async fn gather_at_most<Req, T>(
        &self,
        subject: &str,
        payload: &Req,
        timeout: Duration,
        max: usize,
    ) -> Gathered<T>
    where
        Req: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.run_gather(subject, payload, timeout, Some(max), &CancellationToken::new())
            .await
    }

    /// Gather from aggregators: each reply is itself a list of `T`
    pub async fn nested_gather<Req, T>(
        &self,
        subject: &str,
        payload: &Req,
        timeout: Duration,
    ) -> Gathered<Vec<T>>
    where
        Req: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.gather(subject, payload, timeout).await
    }

    /// [`Client::nested_gather`] that also ends when `cancel` fires
    pub async fn nested_gather_with_cancel<Req, T>(
        &self,
        subject: &str,
        payload: &Req,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Gathered<Vec<T>>
    where
        Req: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.gather_with_cancel(subject, payload, timeout, cancel).await
    }

    /// Single-reply request using the configured request timeout
    pub async fn request<Req, T>(&self, subject: &str, payload: &Req) -> Result<T>
    where
        Req: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request_with_timeout(subject, payload, self.inner.config.request_timeout)
            .await
    }

    /// Wait for the first reply only
    pub async fn request_with_timeout<Req, T>(
        &self,
        subject: &str,
        payload: &Req,
        timeout: Duration,
    ) -> Result<T>
    where
        Req: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let (responses, error) = self
            .run_gather(subject, payload, timeout, Some(1), &CancellationToken::new())
            .await
            .into_parts();

        if let Some(e) = error {
            return Err(e);
        }
        responses.into_iter().next().ok_or_else(|| GatherError::Timeout {
            subject: subject.to_string(),
            timeout,
        })
    }

    async fn run_gather<Req, T>(
        &self,
        subject: &str,
        payload: &Req,
        timeout: Duration,
        max_responses: Option<usize>,
        cancel: &CancellationToken,
    ) -> Gathered<T>
    where
        Req: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        if let Err(e) = self.ensure_open() {
            return Gathered::failed(e);
        }

        // Encode first: a bad payload never touches the transport
        let body = match self.inner.codec.encode(payload) {
            Ok(body) => body,
            Err(e) => return Gathered::failed(e),
        };

        // Fresh reply subject for every call, never shared across calls
        let reply_to = self.inner.transport.new_inbox();
        let mut request = GatherRequest::new(subject, reply_to, timeout, body);
        if let Some(max) = max_responses {
            request = request.with_max_responses(max);
        }

        scatter_gather(&*self.inner.transport, &self.inner.codec, request, cancel).await
    }

    // ------------------------------------------------------------------
    // Persistent subscriptions
    // ------------------------------------------------------------------

    /// Answer every request on `subject` with `data`
    ///
    /// Registering a subject that already has a live subscription on this
    /// client is a no-op returning the existing handle; `data` is dropped.
    pub async fn register_responder<R>(&self, subject: &str, data: R) -> Result<SubscriptionHandle>
    where
        R: Serialize + Send + Sync + 'static,
    {
        let transport = Arc::clone(&self.inner.transport);
        let codec = self.inner.codec.clone();
        self.register(subject, "fixed responder", move |subscription| {
            responder::spawn_fixed(subscription, transport, codec, data)
        })
        .await
    }

    /// Answer every request on `subject` with what `handler` computes from it
    ///
    /// Requests that do not decode as `Req`, and handler errors, get no
    /// reply.
    pub async fn register_handler<Req, Resp, E, F, Fut>(
        &self,
        subject: &str,
        handler: F,
    ) -> Result<SubscriptionHandle>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(Req) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<Resp, E>> + Send + 'static,
    {
        let transport = Arc::clone(&self.inner.transport);
        let codec = self.inner.codec.clone();
        self.register(subject, "computed responder", move |subscription| {
            responder::spawn_computed(subscription, transport, codec, handler)
        })
        .await
    }

    /// Forward every message on `subject`, decoded as `T`, into `sink`
    ///
    /// A bounded sink that is not drained blocks delivery for this subject.
    pub async fn subscribe<T, D>(&self, subject: &str, sink: D) -> Result<SubscriptionHandle>
    where
        T: DeserializeOwned + Send + 'static,
        D: Delivery<T>,
    {
        let codec = self.inner.codec.clone();
        self.register(subject, "stream", move |subscription| {
            stream::spawn_stream(subscription, codec, sink)
        })
        .await
    }

    /// Stop the persistent subscription on `subject`, if any
    pub async fn unsubscribe(&self, subject: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.inner.registry.remove(subject).await.is_some())
    }

    /// Live persistent subscription on `subject`
    pub async fn subscription(&self, subject: &str) -> Option<SubscriptionHandle> {
        self.inner.registry.get(subject).await
    }

    /// Subjects with a live persistent subscription
    pub async fn subscribed_subjects(&self) -> Vec<String> {
        self.inner.registry.subjects().await
    }

    async fn register<S>(&self, subject: &str, kind: &str, start: S) -> Result<SubscriptionHandle>
    where
        S: FnOnce(Box<dyn Subscription>) -> SubscriptionHandle,
    {
        self.ensure_open()?;
        let transport = Arc::clone(&self.inner.transport);

        let (handle, created) = self
            .inner
            .registry
            .get_or_create(subject, || async move {
                let subscription = transport.subscribe(subject).await?;
                let handle = start(subscription);
                if let Err(e) = transport.flush().await {
                    handle.stop();
                    return Err(e);
                }
                Ok(handle)
            })
            .await?;

        if created {
            info!("Registered {} on {}", kind, subject);
        } else {
            debug!("{} on {} already registered, reusing", kind, subject);
        }
        Ok(handle)
    }

    // ------------------------------------------------------------------
    // Publish
    // ------------------------------------------------------------------

    /// Fire-and-forget publish
    pub async fn publish<T>(&self, subject: &str, data: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.ensure_open()?;
        let body = self.inner.codec.encode(data)?;
        self.inner.transport.publish(subject, body).await
    }
}
