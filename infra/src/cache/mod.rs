//! Cache module for Redis-backed storage
//!
//! This module provides the Redis client with connection retry logic and the
//! Redis implementation of the refresh token store.

pub mod redis_client;
pub mod token_store;


pub use redis_client::RedisClient;
pub use token_store::RedisTokenStore;

// Re-export commonly used types
pub use courier_shared::config::CacheConfig;
