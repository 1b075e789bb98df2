//! Login, refresh and logout flow

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::entities::token::{AccessGrant, Claims, Identity, SubjectId, TokenPair};
use crate::errors::{AuthError, DomainError};
use crate::repositories::{TokenStore, UserDirectory};
use crate::services::token::TokenService;

/// Result of a successful login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginOutcome {
    /// Freshly issued token pair
    pub tokens: TokenPair,

    /// Identity embedded in both tokens
    pub identity: Identity,
}

/// Authentication service
pub struct AuthService<U, S>
where
    U: UserDirectory,
    S: TokenStore,
{
    users: Arc<U>,
    tokens: Arc<TokenService<S>>,
}

impl<U, S> Clone for AuthService<U, S>
where
    U: UserDirectory,
    S: TokenStore,
{
    fn clone(&self) -> Self {
        Self {
            users: Arc::clone(&self.users),
            tokens: Arc::clone(&self.tokens),
        }
    }
}

impl<U, S> AuthService<U, S>
where
    U: UserDirectory,
    S: TokenStore,
{
    /// Create a new authentication service
    pub fn new(users: Arc<U>, tokens: Arc<TokenService<S>>) -> Self {
        Self { users, tokens }
    }

    /// The token service sessions are issued through
    pub fn tokens(&self) -> &TokenService<S> {
        &self.tokens
    }

    /// Authenticate a user and open a session
    ///
    /// An unknown username and a wrong password produce the same error.
    ///
    /// # Returns
    /// * `Ok(LoginOutcome)` - Token pair and identity
    /// * `Err(DomainError::Auth(AuthError::InvalidCredentials))` - Rejected
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, DomainError> {
        let account = match self.users.find_by_username(username).await? {
            Some(account) if account.verify_password(password) => account,
            _ => {
                warn!("Login rejected");
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        let identity = account.identity();
        let tokens = self.tokens.issue_token_pair(identity.clone()).await?;

        info!(subject = identity.id, role = %identity.role, "User logged in");

        Ok(LoginOutcome { tokens, identity })
    }

    /// Exchange the subject's refresh token for a new access token
    pub async fn refresh(
        &self,
        refresh_token: &str,
        subject: SubjectId,
    ) -> Result<AccessGrant, DomainError> {
        self.tokens.rotate_access(refresh_token, subject).await
    }

    /// Close the subject's session
    ///
    /// Returns whether a session was open.
    pub async fn logout(&self, subject: SubjectId) -> Result<bool, DomainError> {
        self.tokens.revoke(subject).await
    }

    /// Verify an access token
    pub fn verify(&self, access_token: &str) -> Result<Claims, DomainError> {
        self.tokens.verify_access(access_token)
    }
}
