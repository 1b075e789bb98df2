//! # Infrastructure Layer
//!
//! Concrete implementations behind the Courier core services.
//!
//! ## Architecture
//!
//! The infrastructure layer contains:
//! - **Queue**: durable work queue client with a supervised broker connection,
//!   persistent publishing and single-slot consumption with capped redelivery
//! - **Cache**: Redis client and the Redis-backed refresh token store

// Re-export core types for convenience
pub use courier_core::errors::*;

/// Queue module - broker seam, connection supervisor and client
pub mod queue;

/// Cache module - Redis client and token store
pub mod cache;

mod masking;

use std::sync::Arc;

use courier_core::repositories::{InMemoryTokenStore, TokenStore};
use courier_shared::config::CacheConfig;
use tracing::info;

pub use masking::mask_url;

/// Refresh token store for the given cache settings
///
/// Redis when a cache is configured, otherwise an in-process map that does
/// not survive restarts.
pub async fn token_store(
    cache: Option<CacheConfig>,
) -> Result<Arc<dyn TokenStore>, InfrastructureError> {
    match cache {
        Some(config) => {
            let client = cache::RedisClient::new(config).await?;
            info!("Using Redis token store");
            Ok(Arc::new(cache::RedisTokenStore::new(client)))
        }
        None => {
            info!("Using in-memory token store");
            Ok(Arc::new(InMemoryTokenStore::new()))
        }
    }
}

/// Infrastructure-specific error types
#[derive(Debug, thiserror::Error)]
pub enum InfrastructureError {
    /// Redis cache error
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),
}
