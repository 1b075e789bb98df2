//! Message broker configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

use super::{parse_or, required};

/// Default work queue name
pub const DEFAULT_QUEUE_NAME: &str = "message_queue";

/// Broker connection and delivery policy configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// AMQP connection URL
    pub url: String,

    /// Durable work queue name
    pub queue_name: String,

    /// Durable queue receiving messages that exhausted their attempts
    pub dead_letter_queue: String,

    /// Deliveries allowed per message before it is dead-lettered
    pub max_delivery_attempts: u32,

    /// Delay before the first reconnect attempt in milliseconds
    pub retry_base_delay_ms: u64,

    /// Upper bound of the reconnect delay in milliseconds
    pub retry_max_delay_ms: u64,

    /// Connection attempts before the supervisor gives up
    pub max_connect_attempts: u32,
}

impl BrokerConfig {
    /// Create a configuration for the given broker URL with default policy
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            dead_letter_queue: dead_letter_name(DEFAULT_QUEUE_NAME),
            max_delivery_attempts: 5,
            retry_base_delay_ms: 5_000,
            retry_max_delay_ms: 60_000,
            max_connect_attempts: 10,
        }
    }

    /// Load from `RABBITMQ_URL` and the optional `QUEUE_*` variables
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::new(required(lookup, "RABBITMQ_URL")?);

        let queue_name = lookup("QUEUE_NAME")
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(defaults.queue_name);
        let dead_letter_queue = lookup("QUEUE_DEAD_LETTER_NAME")
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| dead_letter_name(&queue_name));

        let config = Self {
            url: defaults.url,
            queue_name,
            dead_letter_queue,
            max_delivery_attempts: parse_or(
                lookup,
                "QUEUE_MAX_DELIVERY_ATTEMPTS",
                defaults.max_delivery_attempts,
            )?,
            retry_base_delay_ms: parse_or(
                lookup,
                "QUEUE_RETRY_BASE_DELAY_MS",
                defaults.retry_base_delay_ms,
            )?,
            retry_max_delay_ms: parse_or(
                lookup,
                "QUEUE_RETRY_MAX_DELAY_MS",
                defaults.retry_max_delay_ms,
            )?,
            max_connect_attempts: parse_or(
                lookup,
                "QUEUE_MAX_CONNECT_ATTEMPTS",
                defaults.max_connect_attempts,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the reconnect backoff bounds in milliseconds
    pub fn with_retry_delays(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.retry_base_delay_ms = base_ms;
        self.retry_max_delay_ms = max_ms;
        self
    }

    /// Set the number of connection attempts before giving up
    pub fn with_max_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = attempts;
        self
    }

    /// Set the number of deliveries allowed per message
    pub fn with_max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts;
        self
    }

    /// Delay before the first reconnect attempt
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Upper bound of the reconnect delay
    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_delivery_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "QUEUE_MAX_DELIVERY_ATTEMPTS",
                value: String::from("0"),
            });
        }
        if self.max_connect_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "QUEUE_MAX_CONNECT_ATTEMPTS",
                value: String::from("0"),
            });
        }
        if self.queue_name == self.dead_letter_queue {
            return Err(ConfigError::Invalid {
                key: "QUEUE_DEAD_LETTER_NAME",
                value: self.dead_letter_queue.clone(),
            });
        }
        Ok(())
    }
}

fn dead_letter_name(queue_name: &str) -> String {
    format!("{}.dead-letter", queue_name)
}
