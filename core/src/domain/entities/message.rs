//! Work item published to the durable queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sender recorded when the caller does not name one
pub const DEFAULT_SENDER: &str = "anonymous";

/// Message body carried through the broker
///
/// Serialized as `{"content", "timestamp", "sender"}` with an RFC 3339
/// timestamp. It has no identity of its own; delivery metadata stays in the
/// queue layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Free-form payload
    pub content: String,

    /// When the message was created
    pub timestamp: DateTime<Utc>,

    /// Who produced the message
    #[serde(default = "default_sender")]
    pub sender: String,
}

impl QueueMessage {
    /// Creates a message stamped with the current time
    pub fn new(content: impl Into<String>, sender: Option<String>) -> Self {
        Self {
            content: content.into(),
            timestamp: Utc::now(),
            sender: sender
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(default_sender),
        }
    }

    /// Encodes the message for the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decodes a message received from the wire
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

fn default_sender() -> String {
    DEFAULT_SENDER.to_string()
}
