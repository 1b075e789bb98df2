//! In-process implementation of TokenStore

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::entities::token::{RefreshRecord, SubjectId};
use crate::errors::DomainError;

use super::r#trait::TokenStore;

/// Token store held in process memory
///
/// Suitable for tests and single-instance deployments; sessions do not
/// survive a restart. Expired records are treated as absent.
#[derive(Clone, Default)]
pub struct InMemoryTokenStore {
    records: Arc<RwLock<HashMap<SubjectId, RefreshRecord>>>,
}

impl InMemoryTokenStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subjects with a stored record
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether no subject has a stored record
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self, subject: SubjectId) -> Result<Option<RefreshRecord>, DomainError> {
        let records = self.records.read().await;
        Ok(records
            .get(&subject)
            .filter(|record| !record.is_expired())
            .cloned())
    }

    async fn set(&self, subject: SubjectId, record: RefreshRecord) -> Result<(), DomainError> {
        let mut records = self.records.write().await;
        records.insert(subject, record);
        Ok(())
    }

    async fn delete(&self, subject: SubjectId) -> Result<bool, DomainError> {
        let mut records = self.records.write().await;
        Ok(records.remove(&subject).is_some())
    }
}
