//! User account entity used for credential checks.

use serde::{Deserialize, Serialize};

use super::token::{Identity, SubjectId};

/// Account known to the user directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Subject identifier
    pub id: SubjectId,

    /// Unique login name
    pub username: String,

    /// bcrypt hash of the password
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// Role name
    pub role: String,
}

impl UserAccount {
    /// Creates an account, hashing the password with bcrypt
    ///
    /// # Arguments
    ///
    /// * `cost` - bcrypt work factor (4..=31)
    pub fn with_password(
        id: SubjectId,
        username: impl Into<String>,
        password: &str,
        role: impl Into<String>,
        cost: u32,
    ) -> Result<Self, bcrypt::BcryptError> {
        Ok(Self {
            id,
            username: username.into(),
            password_hash: bcrypt::hash(password, cost)?,
            role: role.into(),
        })
    }

    /// Checks a plaintext password against the stored hash
    ///
    /// A malformed stored hash counts as a mismatch.
    pub fn verify_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }

    /// Identity for a session opened now
    pub fn identity(&self) -> Identity {
        Identity::new(self.id, self.username.clone(), self.role.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_verification() {
        let account = UserAccount::with_password(1, "admin", "123456", "admin", 4).unwrap();

        assert_ne!(account.password_hash, "123456");
        assert!(account.verify_password("123456"));
        assert!(!account.verify_password("654321"));
    }

    #[test]
    fn test_corrupt_hash_never_matches() {
        let account = UserAccount {
            id: 2,
            username: "user".into(),
            password_hash: "not-a-bcrypt-hash".into(),
            role: "user".into(),
        };
        assert!(!account.verify_password("not-a-bcrypt-hash"));
    }
}
