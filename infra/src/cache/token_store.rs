//! Redis implementation of the refresh token store
//!
//! Key pattern: `{prefix}:refresh:{subject}`. The value is the JSON
//! [`RefreshRecord`]; its TTL is the record's remaining lifetime, so records
//! of abandoned sessions expire on their own.

use async_trait::async_trait;
use tracing::{debug, warn};

use courier_core::domain::entities::token::{RefreshRecord, SubjectId};
use courier_core::errors::DomainError;
use courier_core::repositories::TokenStore;

use super::RedisClient;
use crate::InfrastructureError;

const REFRESH_KEY_SEGMENT: &str = "refresh";

/// Refresh token store backed by Redis
#[derive(Clone)]
pub struct RedisTokenStore {
    redis_client: RedisClient,
}

impl RedisTokenStore {
    pub fn new(redis_client: RedisClient) -> Self {
        Self { redis_client }
    }

    /// Redis key holding the record of `subject`
    pub fn key_for(&self, subject: SubjectId) -> String {
        refresh_key(&self.redis_client.config().make_key(REFRESH_KEY_SEGMENT), subject)
    }
}

pub(crate) fn refresh_key(namespace: &str, subject: SubjectId) -> String {
    format!("{}:{}", namespace, subject)
}

/// Seconds a record should live in Redis; at least one
pub(crate) fn record_ttl_seconds(record: &RefreshRecord) -> u64 {
    u64::try_from(record.time_until_expiration().num_seconds())
        .unwrap_or(0)
        .max(1)
}

fn store_error(e: InfrastructureError) -> DomainError {
    DomainError::Store {
        message: e.to_string(),
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn get(&self, subject: SubjectId) -> Result<Option<RefreshRecord>, DomainError> {
        let key = self.key_for(subject);

        let Some(json) = self.redis_client.get(&key).await.map_err(store_error)? else {
            return Ok(None);
        };

        let record: RefreshRecord = serde_json::from_str(&json).map_err(|e| {
            warn!(subject, error = %e, "Unreadable refresh record");
            DomainError::Internal {
                message: format!("Failed to deserialize refresh record: {}", e),
            }
        })?;

        Ok((!record.is_expired()).then_some(record))
    }

    async fn set(&self, subject: SubjectId, record: RefreshRecord) -> Result<(), DomainError> {
        let key = self.key_for(subject);
        let ttl = record_ttl_seconds(&record);
        let json = serde_json::to_string(&record).map_err(|e| DomainError::Internal {
            message: format!("Failed to serialize refresh record: {}", e),
        })?;

        self.redis_client
            .set_with_expiry(&key, &json, ttl)
            .await
            .map_err(store_error)?;

        debug!(subject, ttl, "Stored refresh record");
        Ok(())
    }

    async fn delete(&self, subject: SubjectId) -> Result<bool, DomainError> {
        let key = self.key_for(subject);
        self.redis_client.delete(&key).await.map_err(store_error)
    }
}
