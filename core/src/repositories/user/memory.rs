//! In-process implementation of UserDirectory

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::entities::user::UserAccount;
use crate::errors::DomainError;

use super::r#trait::UserDirectory;

/// Fixed set of accounts held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    accounts: HashMap<String, UserAccount>,
}

impl InMemoryUserDirectory {
    /// Create a directory from a list of accounts
    ///
    /// A later account with the same username replaces an earlier one.
    pub fn new(accounts: impl IntoIterator<Item = UserAccount>) -> Self {
        Self {
            accounts: accounts
                .into_iter()
                .map(|account| (account.username.clone(), account))
                .collect(),
        }
    }

    /// Number of accounts
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether the directory holds no accounts
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserAccount>, DomainError> {
        Ok(self.accounts.get(username).cloned())
    }
}
