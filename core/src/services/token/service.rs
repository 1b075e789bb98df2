//! Main token service implementation

use chrono::Utc;
use constant_time_eq::constant_time_eq;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::domain::entities::token::{
    AccessGrant, Claims, Identity, RefreshRecord, SubjectId, TokenKind, TokenPair,
};
use crate::errors::{DomainError, TokenError};
use crate::repositories::TokenStore;

use super::config::TokenServiceConfig;

/// Encoding and decoding halves of one signing secret
struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Service for issuing, verifying, rotating and revoking token sessions
///
/// Access tokens are stateless. Each subject has at most one active refresh
/// token, recorded in the injected [`TokenStore`]; issuing a new pair replaces
/// it and thereby ends the previous session.
pub struct TokenService<S: TokenStore> {
    store: S,
    config: TokenServiceConfig,
    access_keys: SigningKeys,
    refresh_keys: SigningKeys,
    validation: Validation,
}

impl<S: TokenStore> TokenService<S> {
    /// Creates a new token service instance
    ///
    /// # Arguments
    ///
    /// * `store` - Store holding the active refresh record per subject
    /// * `config` - Token service configuration
    pub fn new(store: S, config: TokenServiceConfig) -> Self {
        let access_keys = SigningKeys::from_secret(&config.access_secret);
        let refresh_keys = SigningKeys::from_secret(&config.refresh_secret);

        let mut validation = Validation::new(config.algorithm);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = 0;

        Self {
            store,
            config,
            access_keys,
            refresh_keys,
            validation,
        }
    }

    /// The backing token store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The service configuration
    pub fn config(&self) -> &TokenServiceConfig {
        &self.config
    }

    /// Issues an access/refresh token pair for a subject
    ///
    /// The refresh record for `identity.id` is overwritten unconditionally,
    /// which silently ends any session previously issued to that subject.
    ///
    /// # Returns
    ///
    /// * `Ok(TokenPair)` - The signed pair
    /// * `Err(DomainError)` - Signing or the store failed
    pub async fn issue_token_pair(&self, identity: Identity) -> Result<TokenPair, DomainError> {
        let subject = identity.id;

        let access_claims = self.access_claims(identity.clone());
        let access_token = self.encode_jwt(&access_claims)?;

        let refresh_claims = Claims::new(
            identity,
            TokenKind::Refresh,
            self.config.refresh_token_expiry,
            &self.config.issuer,
            &self.config.audience,
        );
        let refresh_token = self.encode_jwt(&refresh_claims)?;

        let record = RefreshRecord::new(
            hash_token(&refresh_token),
            Utc::now(),
            refresh_claims.expires_at(),
        );
        self.store.set(subject, record).await?;

        info!(subject, "Issued token pair");

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at: access_claims.expires_at(),
            access_expires_in: self.config.access_token_expiry.num_seconds(),
        })
    }

    /// Verifies an access token and returns its claims
    ///
    /// # Returns
    ///
    /// * `Ok(Claims)` - The embedded claims
    /// * `Err(TokenError::Expired)` - Past the validity window
    /// * `Err(TokenError::Malformed)` - Bad signature, structure, issuer,
    ///   audience, or not an access token
    pub fn verify_access(&self, token: &str) -> Result<Claims, DomainError> {
        let claims = self.decode_jwt(token, TokenKind::Access)?;
        debug!(subject = claims.subject(), "Access token verified");
        Ok(claims)
    }

    /// Mints a new access token from the subject's active refresh token
    ///
    /// The new token carries the identity embedded in the refresh token, never
    /// caller-supplied claims.
    ///
    /// # Returns
    ///
    /// * `Ok(AccessGrant)` - The new access token
    /// * `Err(TokenError::Expired | TokenError::Malformed)` - The refresh
    ///   token failed its own signature check
    /// * `Err(TokenError::SubjectMismatch)` - The token belongs to another
    ///   subject, or is not the subject's active refresh token
    pub async fn rotate_access(
        &self,
        refresh_token: &str,
        subject: SubjectId,
    ) -> Result<AccessGrant, DomainError> {
        let refresh_claims = self.decode_jwt(refresh_token, TokenKind::Refresh)?;

        if refresh_claims.subject() != subject {
            warn!(subject, "Refresh token presented for another subject");
            return Err(TokenError::SubjectMismatch.into());
        }

        let record = self
            .store
            .get(subject)
            .await?
            .ok_or(TokenError::SubjectMismatch)?;

        let presented = hash_token(refresh_token);
        if !constant_time_eq(record.token_hash.as_bytes(), presented.as_bytes()) {
            warn!(subject, "Refresh token is not the active session token");
            return Err(TokenError::SubjectMismatch.into());
        }

        let access_claims = self.access_claims(refresh_claims.identity);
        let access_token = self.encode_jwt(&access_claims)?;

        info!(subject, "Rotated access token");

        Ok(AccessGrant {
            access_token,
            access_expires_at: access_claims.expires_at(),
            access_expires_in: self.config.access_token_expiry.num_seconds(),
        })
    }

    /// Ends the subject's session
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - A session existed and was removed
    /// * `Ok(false)` - The subject had no session
    pub async fn revoke(&self, subject: SubjectId) -> Result<bool, DomainError> {
        let removed = self.store.delete(subject).await?;
        if removed {
            info!(subject, "Revoked session");
        } else {
            debug!(subject, "No session to revoke");
        }
        Ok(removed)
    }

    fn access_claims(&self, identity: Identity) -> Claims {
        Claims::new(
            identity,
            TokenKind::Access,
            self.config.access_token_expiry,
            &self.config.issuer,
            &self.config.audience,
        )
    }

    fn keys(&self, kind: TokenKind) -> &SigningKeys {
        match kind {
            TokenKind::Access => &self.access_keys,
            TokenKind::Refresh => &self.refresh_keys,
        }
    }

    /// Encodes claims into a JWT signed with the secret for their kind
    pub(crate) fn encode_jwt(&self, claims: &Claims) -> Result<String, DomainError> {
        let header = Header::new(self.config.algorithm);
        encode(&header, claims, &self.keys(claims.kind).encoding)
            .map_err(|_| DomainError::Token(TokenError::SigningFailed))
    }

    fn decode_jwt(&self, token: &str, kind: TokenKind) -> Result<Claims, DomainError> {
        let token_data = decode::<Claims>(token, &self.keys(kind).decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => DomainError::Token(TokenError::Expired),
                _ => DomainError::Token(TokenError::Malformed),
            })?;

        if token_data.claims.kind != kind {
            return Err(TokenError::Malformed.into());
        }

        Ok(token_data.claims)
    }
}

/// Hashes a token for storage
pub(crate) fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
