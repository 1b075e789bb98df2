//! Token store trait defining the interface for refresh record persistence.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::entities::token::{RefreshRecord, SubjectId};
use crate::errors::DomainError;

/// Keyed store of the single active refresh record per subject
///
/// Implementations must make each operation atomic per key. Writers for the
/// same subject race and the last write wins.
///
/// # Security Considerations
/// - Only token digests are stored, never the raw token
/// - Implementations backed by external stores should expire records with the
///   refresh token lifetime
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Fetch the active record for a subject
    ///
    /// # Returns
    /// * `Ok(Some(RefreshRecord))` - The subject has an active session
    /// * `Ok(None)` - No session for this subject
    /// * `Err(DomainError)` - Store unavailable
    async fn get(&self, subject: SubjectId) -> Result<Option<RefreshRecord>, DomainError>;

    /// Store the record for a subject, replacing any previous one
    ///
    /// # Example
    /// ```no_run
    /// # use chrono::{Duration, Utc};
    /// # use courier_core::repositories::TokenStore;
    /// # use courier_core::domain::entities::RefreshRecord;
    /// # async fn example(store: &impl TokenStore) -> Result<(), Box<dyn std::error::Error>> {
    /// let now = Utc::now();
    /// let record = RefreshRecord::new("sha256-hex".to_string(), now, now + Duration::days(7));
    ///
    /// store.set(42, record).await?;
    /// # Ok(())
    /// # }
    /// ```
    async fn set(&self, subject: SubjectId, record: RefreshRecord) -> Result<(), DomainError>;

    /// Remove the record for a subject
    ///
    /// # Returns
    /// * `Ok(true)` - A record existed and was removed
    /// * `Ok(false)` - No record for this subject
    /// * `Err(DomainError)` - Store unavailable
    async fn delete(&self, subject: SubjectId) -> Result<bool, DomainError>;
}

#[async_trait]
impl<T: TokenStore + ?Sized> TokenStore for Arc<T> {
    async fn get(&self, subject: SubjectId) -> Result<Option<RefreshRecord>, DomainError> {
        (**self).get(subject).await
    }

    async fn set(&self, subject: SubjectId, record: RefreshRecord) -> Result<(), DomainError> {
        (**self).set(subject, record).await
    }

    async fn delete(&self, subject: SubjectId) -> Result<bool, DomainError> {
        (**self).delete(subject).await
    }
}
