//! Token signing configuration

use std::fmt;

use crate::errors::ConfigError;

use super::{parse_or, required};

/// Minimum accepted length of a signing secret in bytes
pub const MIN_SECRET_LENGTH: usize = 32;

/// Default access token lifetime (15 minutes)
pub const DEFAULT_ACCESS_TOKEN_EXPIRY: i64 = 900;

/// Default refresh token lifetime (7 days)
pub const DEFAULT_REFRESH_TOKEN_EXPIRY: i64 = 604_800;

/// JWT signing configuration
///
/// Access and refresh tokens are signed with two independent secrets. There is
/// no built-in fallback secret: both must come from configuration.
#[derive(Clone)]
pub struct JwtConfig {
    /// Secret used to sign access tokens
    pub access_secret: String,

    /// Secret used to sign refresh tokens
    pub refresh_secret: String,

    /// Access token expiry time in seconds
    pub access_token_expiry: i64,

    /// Refresh token expiry time in seconds
    pub refresh_token_expiry: i64,

    /// JWT issuer claim
    pub issuer: String,

    /// JWT audience claim
    pub audience: String,
}

impl JwtConfig {
    /// Create a configuration from the two signing secrets
    ///
    /// Lifetimes, issuer and audience take their defaults.
    pub fn new(
        access_secret: impl Into<String>,
        refresh_secret: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_token_expiry: DEFAULT_ACCESS_TOKEN_EXPIRY,
            refresh_token_expiry: DEFAULT_REFRESH_TOKEN_EXPIRY,
            issuer: String::from("courier"),
            audience: String::from("courier-api"),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from `JWT_SECRET`, `REFRESH_SECRET` and the optional expiry variables
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let access_secret = required(lookup, "JWT_SECRET")?;
        let refresh_secret = required(lookup, "REFRESH_SECRET")?;

        let mut config = Self::new(access_secret, refresh_secret)?;
        config.access_token_expiry =
            parse_or(lookup, "JWT_ACCESS_TOKEN_EXPIRY", DEFAULT_ACCESS_TOKEN_EXPIRY)?;
        config.refresh_token_expiry =
            parse_or(lookup, "JWT_REFRESH_TOKEN_EXPIRY", DEFAULT_REFRESH_TOKEN_EXPIRY)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the secrets and lifetimes
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, secret) in [
            ("JWT_SECRET", &self.access_secret),
            ("REFRESH_SECRET", &self.refresh_secret),
        ] {
            if secret.trim().is_empty() {
                return Err(ConfigError::Missing { key });
            }
            if secret.len() < MIN_SECRET_LENGTH {
                return Err(ConfigError::InsecureSecret {
                    key,
                    reason: format!("must be at least {} bytes", MIN_SECRET_LENGTH),
                });
            }
        }

        if self.access_secret == self.refresh_secret {
            return Err(ConfigError::InsecureSecret {
                key: "REFRESH_SECRET",
                reason: String::from("must differ from JWT_SECRET"),
            });
        }

        if self.access_token_expiry <= 0 {
            return Err(ConfigError::Invalid {
                key: "JWT_ACCESS_TOKEN_EXPIRY",
                value: self.access_token_expiry.to_string(),
            });
        }
        if self.refresh_token_expiry <= 0 {
            return Err(ConfigError::Invalid {
                key: "JWT_REFRESH_TOKEN_EXPIRY",
                value: self.refresh_token_expiry.to_string(),
            });
        }

        Ok(())
    }
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("access_token_expiry", &self.access_token_expiry)
            .field("refresh_token_expiry", &self.refresh_token_expiry)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}
