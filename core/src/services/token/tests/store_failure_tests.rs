//! Token service behaviour when the store is unavailable

use async_trait::async_trait;

use crate::domain::entities::token::{Identity, RefreshRecord, SubjectId};
use crate::errors::DomainError;
use crate::repositories::TokenStore;
use crate::services::token::{TokenService, TokenServiceConfig};

struct UnavailableStore;

#[async_trait]
impl TokenStore for UnavailableStore {
    async fn get(&self, _subject: SubjectId) -> Result<Option<RefreshRecord>, DomainError> {
        Err(DomainError::Store {
            message: "connection refused".into(),
        })
    }

    async fn set(&self, _subject: SubjectId, _record: RefreshRecord) -> Result<(), DomainError> {
        Err(DomainError::Store {
            message: "connection refused".into(),
        })
    }

    async fn delete(&self, _subject: SubjectId) -> Result<bool, DomainError> {
        Err(DomainError::Store {
            message: "connection refused".into(),
        })
    }
}

fn service() -> TokenService<UnavailableStore> {
    let config = TokenServiceConfig::new(
        "test-access-secret-0123456789abcdefghij",
        "test-refresh-secret-0123456789abcdefghi",
    )
    .unwrap();
    TokenService::new(UnavailableStore, config)
}

#[tokio::test]
async fn test_issue_surfaces_store_error() {
    let result = service()
        .issue_token_pair(Identity::new(1, "admin", "admin"))
        .await;
    assert!(matches!(result, Err(DomainError::Store { .. })));
}

#[tokio::test]
async fn test_revoke_surfaces_store_error() {
    assert!(matches!(
        service().revoke(1).await,
        Err(DomainError::Store { .. })
    ));
}
