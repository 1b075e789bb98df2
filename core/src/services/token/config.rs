//! Configuration for the token service

use std::fmt;

use chrono::Duration;
use courier_shared::config::JwtConfig;
use courier_shared::errors::ConfigError;
use jsonwebtoken::Algorithm;

/// Configuration for the token service
///
/// Has no `Default`; both secrets must be supplied.
#[derive(Clone)]
pub struct TokenServiceConfig {
    /// Secret for signing access tokens
    pub access_secret: String,
    /// Secret for signing refresh tokens
    pub refresh_secret: String,
    /// JWT signing algorithm
    pub algorithm: Algorithm,
    /// Access token lifetime
    pub access_token_expiry: Duration,
    /// Refresh token lifetime
    pub refresh_token_expiry: Duration,
    /// Value of the `iss` claim
    pub issuer: String,
    /// Value of the `aud` claim
    pub audience: String,
}

impl TokenServiceConfig {
    /// Create a configuration with default lifetimes (15 minutes / 7 days)
    pub fn new(
        access_secret: impl Into<String>,
        refresh_secret: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Self::from_jwt_config(&JwtConfig::new(access_secret, refresh_secret)?)
    }

    /// Build from the shared JWT configuration, validating it first
    pub fn from_jwt_config(jwt: &JwtConfig) -> Result<Self, ConfigError> {
        jwt.validate()?;

        Ok(Self {
            access_secret: jwt.access_secret.clone(),
            refresh_secret: jwt.refresh_secret.clone(),
            algorithm: Algorithm::HS256,
            access_token_expiry: Duration::seconds(jwt.access_token_expiry),
            refresh_token_expiry: Duration::seconds(jwt.refresh_token_expiry),
            issuer: jwt.issuer.clone(),
            audience: jwt.audience.clone(),
        })
    }

    /// Override the access token lifetime
    pub fn with_access_expiry(mut self, expiry: Duration) -> Self {
        self.access_token_expiry = expiry;
        self
    }

    /// Override the refresh token lifetime
    pub fn with_refresh_expiry(mut self, expiry: Duration) -> Self {
        self.refresh_token_expiry = expiry;
        self
    }
}

impl fmt::Debug for TokenServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenServiceConfig")
            .field("algorithm", &self.algorithm)
            .field("access_token_expiry", &self.access_token_expiry)
            .field("refresh_token_expiry", &self.refresh_token_expiry)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}
