//! Durable work queue client
//!
//! Publishes persistent messages and consumes them one at a time. Failed
//! deliveries are republished with an incremented attempt header; once a
//! message has used up its attempts it is moved to the dead-letter queue.
//! A message whose republish fails is returned to the broker once; if it fails
//! again on redelivery the message is discarded.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::domain::entities::message::QueueMessage;
use futures_util::StreamExt;
use tracing::{debug, error, info, warn};

use super::broker::{BrokerChannel, Delivery, Envelope};
use super::connection::QueueConnection;
use super::error::QueueError;

/// Business logic invoked for each consumed message
///
/// Returning `Ok` acknowledges the message. Returning `Err` hands it back to
/// the queue for another attempt or, past the attempt cap, to the dead-letter
/// queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: QueueMessage) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(QueueMessage) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: QueueMessage) -> anyhow::Result<()> {
        (self)(message).await
    }
}

/// What happens to a delivery once the handler has run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Processed; remove from the queue
    Ack,

    /// Failed; put back on the work queue as attempt `next_attempt`
    Requeue { next_attempt: u32 },

    /// Failed for the last time, or unreadable; move to the dead-letter queue
    DeadLetter { reason: String },
}

/// Caps how often a failing message is handed to a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// Total deliveries allowed, including the first
    pub max_delivery_attempts: u32,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_delivery_attempts: 5,
        }
    }
}

impl RedeliveryPolicy {
    pub fn new(max_delivery_attempts: u32) -> Self {
        Self {
            max_delivery_attempts,
        }
    }

    /// Settlement for a handler failure on the given zero-based attempt
    pub fn on_failure(&self, attempt: u32, reason: impl Into<String>) -> Settlement {
        let next_attempt = attempt.saturating_add(1);
        if next_attempt < self.max_delivery_attempts {
            Settlement::Requeue { next_attempt }
        } else {
            Settlement::DeadLetter {
                reason: reason.into(),
            }
        }
    }
}

/// Client for the configured work queue
#[derive(Clone)]
pub struct QueueClient {
    connection: QueueConnection,
    queue: String,
    dead_letter_queue: String,
    policy: RedeliveryPolicy,
    consumer_tag: String,
}

impl QueueClient {
    /// Create a client for the queues named in the connection's config
    pub fn new(connection: QueueConnection) -> Self {
        let config = connection.config();
        let queue = config.queue_name.clone();
        let dead_letter_queue = config.dead_letter_queue.clone();
        let policy = RedeliveryPolicy::new(config.max_delivery_attempts);

        Self {
            consumer_tag: format!("courier-{}", std::process::id()),
            connection,
            queue,
            dead_letter_queue,
            policy,
        }
    }

    /// The underlying connection
    pub fn connection(&self) -> &QueueConnection {
        &self.connection
    }

    /// Redelivery cap applied by [`consume`](Self::consume)
    pub fn policy(&self) -> RedeliveryPolicy {
        self.policy
    }

    /// Publish a persistent message to the work queue
    ///
    /// Returns `false` without sending when the connection is not `Connected`,
    /// and `false` when serialization, sending or the broker confirm fails.
    /// Nothing is buffered or retried.
    pub async fn publish(&self, message: &QueueMessage) -> bool {
        match self.try_publish(message).await {
            Ok(()) => {
                debug!(queue = %self.queue, sender = %message.sender, "Message published");
                true
            }
            Err(QueueError::NotConnected) => {
                warn!(queue = %self.queue, "Publish skipped: {}", QueueError::NotConnected);
                false
            }
            Err(e) => {
                warn!(queue = %self.queue, error = %e, "Publish failed");
                false
            }
        }
    }

    pub(crate) async fn try_publish(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let channel = self
            .connection
            .channel()
            .await
            .ok_or(QueueError::NotConnected)?;
        let payload = message.to_bytes()?;
        channel.publish(&self.queue, Envelope::new(payload)).await
    }

    /// Consume the work queue until the connection is closed
    ///
    /// Waits for `Connected`, then hands messages to `handler` strictly one at
    /// a time (prefetch 1). When the link drops, consumption resumes on the
    /// next link. Returns `Ok(())` once `close()` has been called.
    pub async fn consume<H>(&self, handler: H) -> Result<(), QueueError>
    where
        H: MessageHandler,
    {
        let mut previous: Option<Arc<dyn BrokerChannel>> = None;

        while let Some(channel) = self.connection.wait_for_channel(previous.as_ref()).await {
            let outcome = self.consume_on(channel.as_ref(), &handler).await;

            if self.connection.is_closing() {
                break;
            }
            match outcome {
                Ok(()) => warn!(queue = %self.queue, "Delivery stream ended"),
                Err(e) => warn!(queue = %self.queue, error = %e, "Consumer interrupted"),
            }

            self.connection.report_broken(&channel).await;
            previous = Some(channel);
        }

        info!(queue = %self.queue, "Consumer stopped");
        Ok(())
    }

    async fn consume_on<H>(&self, channel: &dyn BrokerChannel, handler: &H) -> Result<(), QueueError>
    where
        H: MessageHandler,
    {
        channel.set_prefetch(1).await?;
        let mut deliveries = channel.consume(&self.queue, &self.consumer_tag).await?;
        info!(queue = %self.queue, consumer = %self.consumer_tag, "Consuming");

        while let Some(delivery) = deliveries.next().await {
            let delivery = delivery?;
            let settlement = self.process(handler, delivery.as_ref()).await;
            self.settle(channel, delivery.as_ref(), settlement).await?;
        }

        Ok(())
    }

    async fn process<H>(&self, handler: &H, delivery: &dyn Delivery) -> Settlement
    where
        H: MessageHandler,
    {
        let envelope = delivery.envelope();

        let message = match QueueMessage::from_bytes(&envelope.payload) {
            Ok(message) => message,
            Err(e) => {
                error!(queue = %self.queue, error = %e, "Undecodable message");
                return Settlement::DeadLetter {
                    reason: format!("undecodable payload: {}", e),
                };
            }
        };

        debug!(
            attempt = envelope.attempt,
            redelivered = delivery.redelivered(),
            sender = %message.sender,
            "Handling message"
        );

        match handler.handle(message).await {
            Ok(()) => Settlement::Ack,
            Err(e) => {
                let settlement = self.policy.on_failure(envelope.attempt, format!("{:#}", e));
                match &settlement {
                    Settlement::DeadLetter { .. } => error!(
                        attempt = envelope.attempt,
                        max_attempts = self.policy.max_delivery_attempts,
                        error = %e,
                        "Handler failed on final attempt"
                    ),
                    _ => warn!(
                        attempt = envelope.attempt,
                        max_attempts = self.policy.max_delivery_attempts,
                        error = %e,
                        "Handler failed, requeueing"
                    ),
                }
                settlement
            }
        }
    }

    async fn settle(
        &self,
        channel: &dyn BrokerChannel,
        delivery: &dyn Delivery,
        settlement: Settlement,
    ) -> Result<(), QueueError> {
        let envelope = delivery.envelope();

        let forward = match settlement {
            Settlement::Ack => None,
            Settlement::Requeue { next_attempt } => Some((
                self.queue.as_str(),
                Envelope::new(envelope.payload.clone()).with_attempt(next_attempt),
            )),
            Settlement::DeadLetter { reason } => {
                error!(
                    queue = %self.dead_letter_queue,
                    reason = %reason,
                    "Moving message to dead-letter queue"
                );
                Some((
                    self.dead_letter_queue.as_str(),
                    Envelope::new(envelope.payload.clone())
                        .with_attempt(envelope.attempt)
                        .with_failure_reason(reason),
                ))
            }
        };

        if let Some((queue, forwarded)) = forward {
            if let Err(e) = channel.publish(queue, forwarded).await {
                if delivery.redelivered() {
                    // Requeued once already; again would loop on the same attempt.
                    error!(
                        queue,
                        attempt = envelope.attempt,
                        error = %e,
                        "Republish failed again, discarding message"
                    );
                    return delivery.nack(false).await;
                }

                warn!(
                    queue,
                    attempt = envelope.attempt,
                    error = %e,
                    "Republish failed, returning message to the broker"
                );
                if let Err(nack_error) = delivery.nack(true).await {
                    debug!(error = %nack_error, "Nack after failed republish also failed");
                }
                return Err(e);
            }
        }

        delivery.ack().await
    }
}
