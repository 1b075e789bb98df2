//! Broker seam
//!
//! The queue client talks to the message broker only through these traits.
//! [`AmqpBroker`](super::AmqpBroker) implements them on lapin,
//! [`InMemoryBroker`](super::InMemoryBroker) in process.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use super::error::QueueError;

/// Message header carrying how many times a message was handed to a handler
pub const DELIVERY_ATTEMPT_HEADER: &str = "x-delivery-attempt";

/// Message header carrying the last handler error of a dead-lettered message
pub const FAILURE_REASON_HEADER: &str = "x-failure-reason";

/// Stream of deliveries from one consumer
pub type DeliveryStream = BoxStream<'static, Result<Box<dyn Delivery>, QueueError>>;

/// A message as written to a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Serialized message body
    pub payload: Vec<u8>,

    /// Value of the delivery attempt header
    pub attempt: u32,

    /// Value of the failure reason header, if any
    pub failure_reason: Option<String>,
}

impl Envelope {
    /// A first-attempt envelope
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            attempt: 0,
            failure_reason: None,
        }
    }

    /// The same payload with the attempt counter set
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// The same payload tagged with the reason it failed
    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }
}

/// Opens links to a message broker
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Open a connection and a channel on it
    ///
    /// Publisher confirms are enabled on the returned channel.
    async fn open(&self) -> Result<Arc<dyn BrokerChannel>, QueueError>;

    /// Broker address with credentials masked, for logs
    fn address(&self) -> String;
}

/// One channel on an open broker connection
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a queue that survives broker restarts
    async fn declare_durable_queue(&self, queue: &str) -> Result<(), QueueError>;

    /// Limit how many unacknowledged deliveries a consumer may hold
    async fn set_prefetch(&self, count: u16) -> Result<(), QueueError>;

    /// Publish a persistent message and wait for the broker's confirm
    async fn publish(&self, queue: &str, envelope: Envelope) -> Result<(), QueueError>;

    /// Start a manual-acknowledge consumer
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, QueueError>;

    /// Resolves once the broker side of the link is gone
    async fn closed(&self);

    /// Close the channel, then the connection
    async fn close(&self) -> Result<(), QueueError>;
}

/// A message handed to a consumer, pending settlement
#[async_trait]
pub trait Delivery: Send + Sync {
    /// The delivered message
    fn envelope(&self) -> &Envelope;

    /// Whether the broker delivered this message before without settlement
    fn redelivered(&self) -> bool;

    /// Remove the message from the queue
    async fn ack(&self) -> Result<(), QueueError>;

    /// Reject the message, optionally returning it to the queue
    async fn nack(&self, requeue: bool) -> Result<(), QueueError>;
}
