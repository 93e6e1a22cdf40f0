//! Scatter-gather integration tests
//!
//! Everything runs over the in-process transport; delivery order is
//! controlled by the responders in each test.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nats_gather::{
    CancellationToken, Client, ClientConfig, GatherError, Gathered, InMemoryTransport, Message,
    Transport,
};
use nats_gather::transport::Subscription;

fn client_on(transport: &InMemoryTransport, name: &str) -> Client {
    Client::with_transport(
        Arc::new(transport.clone()),
        ClientConfig::default().with_name(name),
    )
}

/// Answer the first request on `subject` with `bodies`, in order
async fn reply_in_order(transport: &InMemoryTransport, subject: &str, bodies: Vec<&'static [u8]>) {
    let mut sub = transport.subscribe(subject).await.unwrap();
    let transport = transport.clone();
    tokio::spawn(async move {
        let request = sub.next_message().await.unwrap();
        let reply = request.reply.unwrap();
        for body in bodies {
            transport
                .publish(&reply, Bytes::from_static(body))
                .await
                .unwrap();
        }
    });
}

// =============================================================================
// Concrete scenarios
// =============================================================================

#[tokio::test]
async fn test_three_echo_responders() {
    let transport = InMemoryTransport::new();
    let mut responders = Vec::new();
    for value in 1..=3 {
        let responder = client_on(&transport, &format!("echo-{}", value));
        responder.register_responder("svc/echo", value).await.unwrap();
        responders.push(responder);
    }

    let caller = client_on(&transport, "caller");
    let gathered: Gathered<i32> = caller
        .gather("svc/echo", &"ping", Duration::from_millis(200))
        .await;

    assert!(gathered.is_clean());
    let mut values = gathered.responses;
    values.sort();
    assert_eq!(values, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_slow_responder_misses_window() {
    let transport = InMemoryTransport::new();
    let responder = client_on(&transport, "slow");
    responder
        .register_handler("svc/slow", |_: serde_json::Value| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok::<_, GatherError>(1)
        })
        .await
        .unwrap();

    let caller = client_on(&transport, "caller");
    let started = Instant::now();
    let gathered: Gathered<i32> = caller
        .gather("svc/slow", &(), Duration::from_millis(200))
        .await;

    assert!(gathered.is_empty());
    assert!(gathered.is_clean());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_zero_responders_is_empty_and_clean() {
    let transport = InMemoryTransport::new();
    let caller = client_on(&transport, "caller");

    let started = Instant::now();
    let gathered: Gathered<String> = caller
        .gather("svc/nobody", &42, Duration::from_millis(100))
        .await;

    assert!(gathered.is_empty());
    assert!(gathered.error.is_none());
    assert!(started.elapsed() >= Duration::from_millis(100));
}

// =============================================================================
// Partial failure
// =============================================================================

#[tokio::test]
async fn test_bad_second_reply_keeps_first_and_stops() {
    let transport = InMemoryTransport::new();
    reply_in_order(&transport, "svc/mixed", vec![b"1", b"{\"not\":\"an int\"}", b"3"]).await;

    let caller = client_on(&transport, "caller");
    let started = Instant::now();
    let (responses, error) = caller
        .gather::<_, i32>("svc/mixed", &(), Duration::from_secs(5))
        .await
        .into_parts();

    assert_eq!(responses, vec![1]);
    assert!(error.unwrap().is_decode());
    // Nothing after the bad reply is waited for
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_duplicate_replies_are_kept() {
    let transport = InMemoryTransport::new();
    reply_in_order(&transport, "svc/dup", vec![b"7", b"7"]).await;

    let caller = client_on(&transport, "caller");
    let gathered: Gathered<i32> = caller
        .gather("svc/dup", &(), Duration::from_millis(100))
        .await;

    assert_eq!(gathered.responses, vec![7, 7]);
}

// =============================================================================
// Reply subscription lifecycle
// =============================================================================

#[tokio::test]
async fn test_each_call_uses_fresh_reply_subject_and_releases_it() {
    let transport = InMemoryTransport::new();
    let mut requests = transport.subscribe("svc/seen").await.unwrap();
    let caller = client_on(&transport, "caller");

    let mut reply_subjects = Vec::new();
    for _ in 0..2 {
        let gathered: Gathered<i32> = caller
            .gather("svc/seen", &(), Duration::from_millis(30))
            .await;
        assert!(gathered.is_clean());

        let request: Message = requests.next_message().await.unwrap();
        let reply = request.reply.unwrap();
        assert_eq!(transport.subscriber_count(&reply).await, 0);
        reply_subjects.push(reply);
    }

    assert_ne!(reply_subjects[0], reply_subjects[1]);
    // Only the raw request subscription remains
    assert_eq!(transport.total_subscriptions().await, 1);
}

#[tokio::test]
async fn test_reply_subscription_released_after_decode_error() {
    let transport = InMemoryTransport::new();
    reply_in_order(&transport, "svc/bad", vec![b"oops"]).await;

    let caller = client_on(&transport, "caller");
    let gathered: Gathered<i32> = caller
        .gather("svc/bad", &(), Duration::from_secs(5))
        .await;
    assert!(gathered.error.unwrap().is_decode());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.total_subscriptions().await, 0);
}

#[tokio::test]
async fn test_concurrent_callers_do_not_cross_deliver() {
    let transport = InMemoryTransport::new();
    let responder = client_on(&transport, "echo");
    responder
        .register_handler("svc/echo", |x: u32| async move { Ok::<_, GatherError>(x) })
        .await
        .unwrap();

    let caller = client_on(&transport, "caller");
    let mut tasks = Vec::new();
    for x in 0..10u32 {
        let caller = caller.clone();
        tasks.push(tokio::spawn(async move {
            let gathered: Gathered<u32> = caller
                .gather("svc/echo", &x, Duration::from_millis(150))
                .await;
            (x, gathered.responses)
        }));
    }

    for task in tasks {
        let (x, responses) = task.await.unwrap();
        assert_eq!(responses, vec![x]);
    }
}

#[tokio::test]
async fn test_cancel_token_ends_gather_early() {
    let transport = InMemoryTransport::new();
    let responder = client_on(&transport, "echo");
    responder.register_responder("svc/echo", 1).await.unwrap();

    let caller = client_on(&transport, "caller");
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let gathered: Gathered<i32> = caller
        .gather_with_cancel("svc/echo", &(), Duration::from_secs(10), &cancel)
        .await;

    assert_eq!(gathered.responses, vec![1]);
    assert!(gathered.is_clean());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_max_window_waits_for_cancel() {
    let transport = InMemoryTransport::new();
    let responder = client_on(&transport, "echo");
    responder.register_responder("svc/echo", 1).await.unwrap();

    let caller = client_on(&transport, "caller");
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let gathered: Gathered<i32> = caller
        .gather_with_cancel("svc/echo", &(), Duration::MAX, &cancel)
        .await;

    assert_eq!(gathered.responses, vec![1]);
    assert!(gathered.is_clean());

    let first: i32 = tokio_test::assert_ok!(
        caller
            .request_with_timeout("svc/echo", &(), Duration::MAX)
            .await
    );
    assert_eq!(first, 1);
}

#[tokio::test]
async fn test_gather_at_most_stops_at_cap() {
    let transport = InMemoryTransport::new();
    reply_in_order(&transport, "svc/many", vec![b"1", b"2", b"3"]).await;

    let caller = client_on(&transport, "caller");
    let started = Instant::now();
    let gathered: Gathered<i32> = caller
        .gather_at_most("svc/many", &(), Duration::from_secs(5), 2)
        .await;

    assert_eq!(gathered.responses, vec![1, 2]);
    assert!(started.elapsed() < Duration::from_secs(1));
}

// =============================================================================
// Failures before anything is gathered
// =============================================================================

/// Transport whose subscribe always fails
struct NoSubscribe {
    inner: InMemoryTransport,
}

#[async_trait::async_trait]
impl Transport for NoSubscribe {
    async fn publish(&self, subject: &str, payload: Bytes) -> nats_gather::Result<()> {
        self.inner.publish(subject, payload).await
    }

    async fn publish_request(
        &self,
        subject: &str,
        reply_to: &str,
        payload: Bytes,
    ) -> nats_gather::Result<()> {
        self.inner.publish_request(subject, reply_to, payload).await
    }

    async fn subscribe(&self, _subject: &str) -> nats_gather::Result<Box<dyn Subscription>> {
        Err(GatherError::Transport("permissions violation".to_string()))
    }

    fn new_inbox(&self) -> String {
        self.inner.new_inbox()
    }

    async fn flush(&self) -> nats_gather::Result<()> {
        self.inner.flush().await
    }

    async fn close(&self) -> nats_gather::Result<()> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_subscribe_failure_is_fatal_and_publishes_nothing() {
    let transport = InMemoryTransport::new();
    let mut watcher = transport.subscribe("svc/echo").await.unwrap();
    let caller = Client::with_transport(
        Arc::new(NoSubscribe {
            inner: transport.clone(),
        }),
        ClientConfig::default(),
    );

    let gathered: Gathered<i32> = caller
        .gather("svc/echo", &(), Duration::from_millis(100))
        .await;
    assert!(gathered.is_empty());
    assert!(gathered.error.unwrap().is_transport());

    let err = tokio_test::assert_err!(caller.register_responder("svc/echo", 1).await);
    assert!(err.is_transport());
    assert!(caller.subscribed_subjects().await.is_empty());

    let nothing = tokio::time::timeout(Duration::from_millis(50), watcher.next_message()).await;
    assert!(nothing.is_err());
}

#[tokio::test]
async fn test_encode_failure_publishes_nothing() {
    let transport = InMemoryTransport::new();
    let mut watcher = transport.subscribe("svc/echo").await.unwrap();
    let caller = client_on(&transport, "caller");

    // JSON object keys must be strings
    let mut bad = HashMap::new();
    bad.insert((1, 2), "pair");

    let gathered: Gathered<i32> = caller
        .gather("svc/echo", &bad, Duration::from_millis(100))
        .await;
    assert!(gathered.error.unwrap().is_encode());

    let err = tokio_test::assert_err!(caller.publish("svc/echo", &bad).await);
    assert!(err.is_encode());

    let nothing = tokio::time::timeout(Duration::from_millis(50), watcher.next_message()).await;
    assert!(nothing.is_err());
    assert_eq!(transport.total_subscriptions().await, 1);
}
