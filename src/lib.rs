//! nats-gather - scatter-gather request/response over NATS
//!
//! "Ask, and it shall be given you" - Matthew 7:7
//!
//! A caller publishes one request and collects every reply that arrives on
//! a private reply subject within a time window. Responders answer on the
//! request's embedded reply subject, either with a fixed value or with one
//! computed from the request. Aggregating responders can run a gather of
//! their own and reply with the list (nested gather).
//!
//! ## Components
//!
//! - **Transport**: publish / subscribe / inbox / flush primitives, backed
//!   by NATS or by an in-process broker
//! - **Registry**: one persistent subscription per subject per client
//! - **Gather**: the publish-then-collect loop with deadline, cancellation
//!   and partial results
//! - **Responder**: fixed-answer and computed-answer request handlers
//! - **Stream**: decoded push delivery into a channel
//! - **Client**: the public API tying it together

pub mod client;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod gather;
pub mod playground;
pub mod registry;
pub mod responder;
pub mod stream;
pub mod transport;
pub mod types;

pub use client::Client;
pub use codec::{Codec, JsonCodec, MsgPackCodec};
pub use config::{ClientConfig, NatsArgs};
pub use gather::Gathered;
pub use registry::SubscriptionHandle;
pub use stream::Delivery;
pub use transport::{InMemoryTransport, Message, NatsTransport, Transport};
pub use types::{GatherError, Result};
pub use tokio_util::sync::CancellationToken;
