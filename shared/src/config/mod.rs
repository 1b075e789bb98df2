//! Configuration module with business-specific sub-modules
//!
//! This module organizes configuration into logical areas:
//! - `auth` - Token signing secrets and lifetimes
//! - `broker` - Message broker address, queue names and retry policy
//! - `cache` - Redis configuration for the refresh token store
//! - `environment` - Environment detection and logging configuration
//!
//! Every loader reads through a lookup function so the same code path serves
//! `std::env` in production and plain maps in tests.

pub mod auth;
pub mod broker;
pub mod cache;
pub mod environment;

use std::str::FromStr;

use crate::errors::ConfigError;

// Re-export commonly used types
pub use auth::JwtConfig;
pub use broker::BrokerConfig;
pub use cache::CacheConfig;
pub use environment::{Environment, LogFormat, LoggingConfig};

/// Complete application configuration combining all sub-configurations
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Environment configuration
    pub environment: Environment,

    /// Token signing configuration
    pub jwt: JwtConfig,

    /// Broker configuration
    pub broker: BrokerConfig,

    /// Redis configuration, absent when the in-memory token store is used
    pub cache: Option<CacheConfig>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from the process environment
    ///
    /// Fails fast when a required variable (`JWT_SECRET`, `REFRESH_SECRET`,
    /// `RABBITMQ_URL`) is missing or a numeric value cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = Environment::from_lookup(&lookup);

        Ok(Self {
            environment,
            jwt: JwtConfig::from_lookup(&lookup)?,
            broker: BrokerConfig::from_lookup(&lookup)?,
            cache: CacheConfig::from_lookup(&lookup)?,
            logging: LoggingConfig::for_environment(environment),
        })
    }
}

/// Fetch a variable that must be present and non-blank
pub(crate) fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing { key }),
    }
}

/// Parse an optional variable, falling back to `default` when absent
pub(crate) fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key,
                value: raw.clone(),
            })
        }
        _ => Ok(default),
    }
}
