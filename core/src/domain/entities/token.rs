//! Token entities for JWT-based session management.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an authenticated subject
pub type SubjectId = u64;

/// Identity fields carried inside every token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Subject identifier
    pub id: SubjectId,

    /// Login name
    pub username: String,

    /// Role name, resolved to permissions outside of this crate
    pub role: String,

    /// When the session was opened
    #[serde(rename = "loginTime")]
    pub login_time: DateTime<Utc>,
}

impl Identity {
    /// Creates an identity whose session starts now
    pub fn new(id: SubjectId, username: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            role: role.into(),
            login_time: Utc::now(),
        }
    }
}

/// Which secret and lifetime a token was minted with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims structure for JWT payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Identity of the subject
    #[serde(flatten)]
    pub identity: Identity,

    /// Issued at timestamp
    pub iat: i64,

    /// Not before timestamp
    pub nbf: i64,

    /// Expiration timestamp
    pub exp: i64,

    /// Issuer
    pub iss: String,

    /// Audience
    pub aud: String,

    /// JWT ID (unique identifier for the token)
    pub jti: String,

    /// Access or refresh
    pub kind: TokenKind,
}

impl Claims {
    /// Creates claims valid from now for `lifetime`
    ///
    /// # Arguments
    ///
    /// * `identity` - Identity to embed
    /// * `kind` - Access or refresh
    /// * `lifetime` - How long the token stays valid
    /// * `issuer` - Value of the `iss` claim
    /// * `audience` - Value of the `aud` claim
    pub fn new(
        identity: Identity,
        kind: TokenKind,
        lifetime: Duration,
        issuer: &str,
        audience: &str,
    ) -> Self {
        let now = Utc::now();

        Self {
            identity,
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + lifetime).timestamp(),
            iss: issuer.to_string(),
            aud: audience.to_string(),
            jti: Uuid::new_v4().to_string(),
            kind,
        }
    }

    /// Subject identifier embedded in the claims
    pub fn subject(&self) -> SubjectId {
        self.identity.id
    }

    /// Expiration as a timestamp
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Checks if the claims have expired
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }
}

/// Token pair returned on login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// Short-lived access token (not tracked server side)
    pub access_token: String,

    /// Long-lived refresh token (tracked in the token store)
    pub refresh_token: String,

    /// When the access token expires
    pub access_expires_at: DateTime<Utc>,

    /// Access token lifetime in seconds
    pub access_expires_in: i64,
}

/// New access token minted from a refresh token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    /// Freshly signed access token
    pub access_token: String,

    /// When the access token expires
    pub access_expires_at: DateTime<Utc>,

    /// Access token lifetime in seconds
    pub access_expires_in: i64,
}

/// The single active refresh credential of a subject
///
/// Only the SHA-256 digest of the token is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRecord {
    /// Hex-encoded SHA-256 digest of the refresh token
    pub token_hash: String,

    /// When the refresh token was issued
    pub issued_at: DateTime<Utc>,

    /// When the refresh token expires
    pub expires_at: DateTime<Utc>,
}

impl RefreshRecord {
    /// Creates a record for a token digest
    pub fn new(token_hash: String, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token_hash,
            issued_at,
            expires_at,
        }
    }

    /// Checks if the refresh token has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Remaining lifetime, zero once expired
    pub fn time_until_expiration(&self) -> Duration {
        let now = Utc::now();
        if self.expires_at > now {
            self.expires_at - now
        } else {
            Duration::zero()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_wire_names() {
        let identity = Identity::new(1, "admin", "admin");
        let claims = Claims::new(
            identity,
            TokenKind::Access,
            Duration::minutes(15),
            "courier",
            "courier-api",
        );

        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["username"], "admin");
        assert_eq!(json["role"], "admin");
        assert!(json["loginTime"].is_string());
        assert_eq!(json["kind"], "access");
        assert_eq!(json["exp"].as_i64().unwrap() - json["iat"].as_i64().unwrap(), 900);

        let back: Claims = serde_json::from_value(json).unwrap();
        assert_eq!(back, claims);
    }

    #[test]
    fn test_each_claims_gets_its_own_jti() {
        let identity = Identity::new(7, "user", "user");
        let a = Claims::new(identity.clone(), TokenKind::Refresh, Duration::days(7), "i", "a");
        let b = Claims::new(identity, TokenKind::Refresh, Duration::days(7), "i", "a");
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn test_refresh_record_expiry() {
        let now = Utc::now();
        let live = RefreshRecord::new("h".into(), now, now + Duration::days(1));
        let dead = RefreshRecord::new("h".into(), now - Duration::days(2), now - Duration::days(1));

        assert!(!live.is_expired());
        assert!(live.time_until_expiration() > Duration::hours(23));
        assert!(dead.is_expired());
        assert_eq!(dead.time_until_expiration(), Duration::zero());
    }
}
