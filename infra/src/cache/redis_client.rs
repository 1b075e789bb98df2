//! Redis client with connection retry and basic key operations

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError};
use tracing::{debug, error, info, warn};

use courier_shared::config::CacheConfig;

use crate::{mask_url, InfrastructureError};

/// Upper bound for the delay between connection attempts
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Redis client sharing one multiplexed connection
///
/// Cloning is cheap; clones share the connection.
#[derive(Clone)]
pub struct RedisClient {
    connection: MultiplexedConnection,
    config: CacheConfig,
}

impl RedisClient {
    /// Connect to Redis, retrying transient failures with exponential backoff
    ///
    /// # Returns
    /// * `Ok(RedisClient)` - Connected client
    /// * `Err(InfrastructureError::Cache)` - Invalid URL, or every attempt failed
    pub async fn new(config: CacheConfig) -> Result<Self, InfrastructureError> {
        let client = Client::open(config.url.as_str())?;
        let attempts = config.max_retries.max(1);
        let mut delay = Duration::from_millis(config.retry_delay_ms);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match client.get_multiplexed_tokio_connection().await {
                Ok(connection) => {
                    info!(url = %mask_url(&config.url), attempt, "Connected to Redis");
                    return Ok(Self { connection, config });
                }
                Err(e) if attempt < attempts && is_retriable_error(&e) => {
                    warn!(
                        url = %mask_url(&config.url),
                        error = %e,
                        attempt,
                        max_attempts = attempts,
                        "Redis connection failed, retrying..."
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                }
                Err(e) => {
                    error!(
                        url = %mask_url(&config.url),
                        error = %e,
                        attempt,
                        "Failed to connect to Redis"
                    );
                    return Err(e.into());
                }
            }
        }
    }

    /// Cache configuration this client was created with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a string value
    pub async fn get(&self, key: &str) -> Result<Option<String>, InfrastructureError> {
        let mut connection = self.connection.clone();
        let value: Option<String> = connection.get(key).await?;
        debug!(key, hit = value.is_some(), "Redis GET");
        Ok(value)
    }

    /// Set a string value that expires after `expiry_seconds`
    pub async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        expiry_seconds: u64,
    ) -> Result<(), InfrastructureError> {
        let mut connection = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(expiry_seconds)
            .query_async::<_, ()>(&mut connection)
            .await?;
        debug!(key, expiry_seconds, "Redis SETEX");
        Ok(())
    }

    /// Delete a key, returning whether it existed
    pub async fn delete(&self, key: &str) -> Result<bool, InfrastructureError> {
        let mut connection = self.connection.clone();
        let removed: u64 = connection.del(key).await?;
        debug!(key, removed, "Redis DEL");
        Ok(removed > 0)
    }

    /// Whether a key exists
    pub async fn exists(&self, key: &str) -> Result<bool, InfrastructureError> {
        let mut connection = self.connection.clone();
        Ok(connection.exists(key).await?)
    }

    /// Remaining time to live in seconds, `None` if the key is missing or has
    /// no expiry
    pub async fn ttl(&self, key: &str) -> Result<Option<i64>, InfrastructureError> {
        let mut connection = self.connection.clone();
        let ttl: i64 = redis::cmd("TTL").arg(key).query_async(&mut connection).await?;
        Ok((ttl >= 0).then_some(ttl))
    }
}

/// Whether an error is worth another connection attempt
pub fn is_retriable_error(error: &RedisError) -> bool {
    error.is_io_error()
        || error.is_connection_refusal()
        || error.is_connection_dropped()
        || error.is_timeout()
}
