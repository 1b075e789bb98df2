//! Token service module for JWT session management
//!
//! This module handles all token-related operations including:
//! - Access/refresh token pair issuance with two independent secrets
//! - Access token verification
//! - Access token rotation from the subject's single active refresh token
//! - Session revocation

mod config;
mod service;

#[cfg(test)]
mod tests;

pub use config::TokenServiceConfig;
pub use service::TokenService;
