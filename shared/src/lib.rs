//! Shared configuration and error payloads for the Courier services
//!
//! This crate provides common functionality used across all server crates:
//! - Configuration types loaded from the process environment
//! - The uniform error response returned to API callers
//! - Configuration errors raised when required settings are missing

pub mod config;
pub mod errors;

// Re-export commonly used items at crate root
pub use config::{
    AppConfig, BrokerConfig, CacheConfig, Environment, JwtConfig, LogFormat, LoggingConfig,
};
pub use errors::{error_codes, ConfigError, ErrorResponse, IntoErrorResponse};
