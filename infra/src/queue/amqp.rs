//! AMQP 0-9-1 broker on lapin

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::watch;
use tracing::warn;

use super::broker::{
    Broker, BrokerChannel, Delivery, DeliveryStream, Envelope, DELIVERY_ATTEMPT_HEADER,
    FAILURE_REASON_HEADER,
};
use super::error::QueueError;
use crate::mask_url;

/// Persistent delivery mode
const PERSISTENT: u8 = 2;

const REPLY_SUCCESS: u16 = 200;

/// Broker reached over AMQP
#[derive(Clone)]
pub struct AmqpBroker {
    url: String,
}

impl AmqpBroker {
    /// Create a broker for an `amqp://` or `amqps://` URL
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn open(&self) -> Result<Arc<dyn BrokerChannel>, QueueError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let dropped = Arc::new(watch::channel(false).0);
        let on_error = Arc::clone(&dropped);
        connection.on_error(move |e| {
            warn!(error = %e, "AMQP connection error");
            on_error.send_replace(true);
        });

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(Arc::new(AmqpChannel {
            connection,
            channel,
            dropped,
        }))
    }

    fn address(&self) -> String {
        mask_url(&self.url)
    }
}

struct AmqpChannel {
    connection: Connection,
    channel: Channel,
    dropped: Arc<watch::Sender<bool>>,
}

fn properties(envelope: &Envelope) -> BasicProperties {
    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from(DELIVERY_ATTEMPT_HEADER),
        AMQPValue::LongUInt(envelope.attempt),
    );
    if let Some(reason) = &envelope.failure_reason {
        headers.insert(
            ShortString::from(FAILURE_REASON_HEADER),
            AMQPValue::LongString(LongString::from(reason.as_str())),
        );
    }

    BasicProperties::default()
        .with_delivery_mode(PERSISTENT)
        .with_content_type(ShortString::from("application/json"))
        .with_headers(headers)
}

/// Read the attempt header, tolerating any integer width another client chose
fn attempt_from(properties: &BasicProperties) -> u32 {
    let value = properties
        .headers()
        .as_ref()
        .and_then(|headers| headers.inner().get(&ShortString::from(DELIVERY_ATTEMPT_HEADER)).cloned());

    let attempt = match value {
        Some(AMQPValue::ShortShortUInt(v)) => i64::from(v),
        Some(AMQPValue::ShortShortInt(v)) => i64::from(v),
        Some(AMQPValue::ShortUInt(v)) => i64::from(v),
        Some(AMQPValue::ShortInt(v)) => i64::from(v),
        Some(AMQPValue::LongUInt(v)) => i64::from(v),
        Some(AMQPValue::LongInt(v)) => i64::from(v),
        Some(AMQPValue::LongLongInt(v)) => v,
        _ => 0,
    };
    u32::try_from(attempt).unwrap_or(0)
}

fn reason_from(properties: &BasicProperties) -> Option<String> {
    match properties
        .headers()
        .as_ref()
        .and_then(|headers| headers.inner().get(&ShortString::from(FAILURE_REASON_HEADER)))
    {
        Some(AMQPValue::LongString(reason)) => {
            Some(String::from_utf8_lossy(reason.as_bytes()).into_owned())
        }
        _ => None,
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_durable_queue(&self, queue: &str) -> Result<(), QueueError> {
        let options = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };
        self.channel
            .queue_declare(queue, options, FieldTable::default())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), QueueError> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::Consume(e.to_string()))
    }

    async fn publish(&self, queue: &str, envelope: Envelope) -> Result<(), QueueError> {
        let confirm = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &envelope.payload,
                properties(&envelope),
            )
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        let confirmation = confirm
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        if confirmation.is_nack() {
            return Err(QueueError::Publish(String::from(
                "broker rejected the message",
            )));
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, QueueError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Consume(e.to_string()))?;

        let deliveries = consumer.map(|delivery| -> Result<Box<dyn Delivery>, QueueError> {
            let delivery = delivery.map_err(|e| QueueError::Consume(e.to_string()))?;
            let envelope = Envelope {
                attempt: attempt_from(&delivery.properties),
                failure_reason: reason_from(&delivery.properties),
                payload: delivery.data.clone(),
            };
            let delivery: Box<dyn Delivery> = Box::new(AmqpDelivery { envelope, delivery });
            Ok(delivery)
        });

        Ok(deliveries.boxed())
    }

    async fn closed(&self) {
        let mut dropped = self.dropped.subscribe();
        let _ = dropped.wait_for(|dropped| *dropped).await;
    }

    async fn close(&self) -> Result<(), QueueError> {
        let channel = self.channel.close(REPLY_SUCCESS, "closing").await;
        let connection = self.connection.close(REPLY_SUCCESS, "closing").await;

        channel
            .and(connection)
            .map_err(|e| QueueError::Connection(e.to_string()))
    }
}

struct AmqpDelivery {
    envelope: Envelope,
    delivery: lapin::message::Delivery,
}

#[async_trait]
impl Delivery for AmqpDelivery {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn redelivered(&self) -> bool {
        self.delivery.redelivered
    }

    async fn ack(&self) -> Result<(), QueueError> {
        self.delivery
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| QueueError::Consume(e.to_string()))
    }

    async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        let options = BasicNackOptions {
            requeue,
            ..BasicNackOptions::default()
        };
        self.delivery
            .acker
            .nack(options)
            .await
            .map(|_| ())
            .map_err(|e| QueueError::Consume(e.to_string()))
    }
}
