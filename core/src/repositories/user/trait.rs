//! User directory trait used by the login flow.

use async_trait::async_trait;

use crate::domain::entities::user::UserAccount;
use crate::errors::DomainError;

/// Read-only lookup of accounts by login name
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find an account by its username
    ///
    /// # Returns
    /// * `Ok(Some(UserAccount))` - Account found
    /// * `Ok(None)` - No account with this username
    /// * `Err(DomainError)` - Lookup failed
    async fn find_by_username(&self, username: &str) -> Result<Option<UserAccount>, DomainError>;
}
