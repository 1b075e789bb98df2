//! Queue error types

use thiserror::Error;

/// Errors raised by the broker seam and the queue client
///
/// Connection failures are retried by the supervisor and never surface from
/// `connect()`; publishing reports failure as `false`.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Channel is closed")]
    Closed,
}
