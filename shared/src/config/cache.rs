//! Cache configuration module

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

use super::parse_or;

/// Redis cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Redis connection URL
    pub url: String,

    /// Prefix applied to every key written by the service
    #[serde(default)]
    pub key_prefix: Option<String>,

    /// Connection attempts before giving up at startup
    pub max_retries: u32,

    /// Base delay between connection attempts in milliseconds
    pub retry_delay_ms: u64,
}

impl CacheConfig {
    /// Create a new cache configuration with URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: Some(String::from("courier")),
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }

    /// Load from `REDIS_URL`; `None` when the variable is unset
    pub fn from_lookup<F>(lookup: &F) -> Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(url) = lookup("REDIS_URL").filter(|url| !url.trim().is_empty()) else {
            return Ok(None);
        };

        let mut config = Self::new(url);
        if let Some(prefix) = lookup("REDIS_KEY_PREFIX") {
            config.key_prefix = Some(prefix).filter(|p| !p.is_empty());
        }
        config.max_retries = parse_or(lookup, "REDIS_MAX_RETRIES", config.max_retries)?;
        Ok(Some(config))
    }

    /// Set the key prefix for all cache keys
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Generate a cache key with prefix
    pub fn make_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }
}
