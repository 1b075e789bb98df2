//! Unit tests for token service

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};

use crate::domain::entities::token::{Claims, Identity, TokenKind};
use crate::errors::{DomainError, TokenError};
use crate::repositories::{InMemoryTokenStore, TokenStore};
use crate::services::token::{TokenService, TokenServiceConfig};

const ACCESS_SECRET: &str = "test-access-secret-0123456789abcdefghij";
const REFRESH_SECRET: &str = "test-refresh-secret-0123456789abcdefghi";

fn create_test_service() -> TokenService<InMemoryTokenStore> {
    let config = TokenServiceConfig::new(ACCESS_SECRET, REFRESH_SECRET).unwrap();
    TokenService::new(InMemoryTokenStore::new(), config)
}

fn admin() -> Identity {
    Identity::new(1, "admin", "admin")
}

fn assert_token_error(result: Result<impl std::fmt::Debug, DomainError>, expected: TokenError) {
    match result {
        Err(DomainError::Token(actual)) => assert_eq!(actual, expected),
        other => panic!("expected {:?}, got {:?}", expected, other),
    }
}

/// Replaces the payload segment of a JWT, keeping header and signature
fn with_payload(token: &str, payload: &serde_json::Value) -> String {
    let parts: Vec<&str> = token.split('.').collect();
    let encoded = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
    format!("{}.{}.{}", parts[0], encoded, parts[2])
}

fn decode_payload(token: &str) -> serde_json::Value {
    let payload = token.split('.').nth(1).unwrap();
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap()
}

#[tokio::test]
async fn test_issue_token_pair() {
    let service = create_test_service();

    let pair = service.issue_token_pair(admin()).await.unwrap();

    assert!(!pair.access_token.is_empty());
    assert!(!pair.refresh_token.is_empty());
    assert_ne!(pair.access_token, pair.refresh_token);
    assert_eq!(pair.access_expires_in, 15 * 60);
    assert!(pair.access_expires_at > Utc::now());

    let record = service.store().get(1).await.unwrap().unwrap();
    assert_ne!(record.token_hash, pair.refresh_token);
    assert_eq!(record.token_hash.len(), 64);
    assert!(record.expires_at - Utc::now() > Duration::days(6));
}

#[tokio::test]
async fn test_verify_access_returns_claims() {
    let service = create_test_service();
    let pair = service.issue_token_pair(admin()).await.unwrap();

    let claims = service.verify_access(&pair.access_token).unwrap();

    assert_eq!(claims.identity.id, 1);
    assert_eq!(claims.identity.username, "admin");
    assert_eq!(claims.identity.role, "admin");
    assert_eq!(claims.kind, TokenKind::Access);
    assert_eq!(claims.iss, "courier");
    assert_eq!(claims.aud, "courier-api");
}

#[tokio::test]
async fn test_verify_rejects_garbage() {
    let service = create_test_service();
    assert_token_error(service.verify_access("invalid_token"), TokenError::Malformed);
    assert_token_error(service.verify_access(""), TokenError::Malformed);
}

#[tokio::test]
async fn test_verify_rejects_token_signed_with_other_secret() {
    let service = create_test_service();
    let other = TokenService::new(
        InMemoryTokenStore::new(),
        TokenServiceConfig::new(
            "another-access-secret-0123456789abcdefgh",
            "another-refresh-secret-0123456789abcdefg",
        )
        .unwrap(),
    );
    let foreign = other.issue_token_pair(admin()).await.unwrap();

    assert_token_error(service.verify_access(&foreign.access_token), TokenError::Malformed);
}

#[tokio::test]
async fn test_verify_rejects_expired_token() {
    let service = create_test_service();
    let mut claims = Claims::new(
        admin(),
        TokenKind::Access,
        Duration::minutes(15),
        "courier",
        "courier-api",
    );
    claims.iat -= 3600;
    claims.nbf -= 3600;
    claims.exp = Utc::now().timestamp() - 60;
    let expired = service.encode_jwt(&claims).unwrap();

    assert_token_error(service.verify_access(&expired), TokenError::Expired);
}

#[tokio::test]
async fn test_verify_rejects_altered_payload() {
    let service = create_test_service();
    let user = Identity::new(2, "user", "user");
    let pair = service.issue_token_pair(user).await.unwrap();

    let mut payload = decode_payload(&pair.access_token);
    payload["role"] = serde_json::Value::String("admin".into());
    let forged = with_payload(&pair.access_token, &payload);

    assert_token_error(service.verify_access(&forged), TokenError::Malformed);
}

#[tokio::test]
async fn test_refresh_token_is_not_an_access_token() {
    let service = create_test_service();
    let pair = service.issue_token_pair(admin()).await.unwrap();

    assert_token_error(service.verify_access(&pair.refresh_token), TokenError::Malformed);
}

#[tokio::test]
async fn test_rotate_access_keeps_embedded_identity() {
    let service = create_test_service();
    let identity = admin();
    let pair = service.issue_token_pair(identity.clone()).await.unwrap();

    let grant = service.rotate_access(&pair.refresh_token, 1).await.unwrap();

    assert_ne!(grant.access_token, pair.access_token);
    assert_eq!(grant.access_expires_in, 15 * 60);
    let original = service.verify_access(&pair.access_token).unwrap();
    let rotated = service.verify_access(&grant.access_token).unwrap();
    assert_eq!(rotated.identity, original.identity);
    assert_eq!(rotated.identity, identity);
}

#[tokio::test]
async fn test_rotate_keeps_refresh_token_active() {
    let service = create_test_service();
    let pair = service.issue_token_pair(admin()).await.unwrap();

    service.rotate_access(&pair.refresh_token, 1).await.unwrap();
    service.rotate_access(&pair.refresh_token, 1).await.unwrap();
}

#[tokio::test]
async fn test_second_issue_invalidates_first_refresh_token() {
    let service = create_test_service();
    let first = service.issue_token_pair(admin()).await.unwrap();
    let second = service.issue_token_pair(admin()).await.unwrap();

    assert_ne!(first.refresh_token, second.refresh_token);
    assert_token_error(
        service.rotate_access(&first.refresh_token, 1).await,
        TokenError::SubjectMismatch,
    );
    assert!(service.rotate_access(&second.refresh_token, 1).await.is_ok());
}

#[tokio::test]
async fn test_rotate_rejects_other_subject() {
    let service = create_test_service();
    let pair = service.issue_token_pair(admin()).await.unwrap();
    service
        .issue_token_pair(Identity::new(2, "user", "user"))
        .await
        .unwrap();

    assert_token_error(
        service.rotate_access(&pair.refresh_token, 2).await,
        TokenError::SubjectMismatch,
    );
    assert_token_error(
        service.rotate_access(&pair.refresh_token, 99).await,
        TokenError::SubjectMismatch,
    );
}

#[tokio::test]
async fn test_rotate_rejects_access_token() {
    let service = create_test_service();
    let pair = service.issue_token_pair(admin()).await.unwrap();

    assert_token_error(
        service.rotate_access(&pair.access_token, 1).await,
        TokenError::Malformed,
    );
}

#[tokio::test]
async fn test_rotate_rejects_expired_refresh_token() {
    let service = create_test_service();
    let mut claims = Claims::new(
        admin(),
        TokenKind::Refresh,
        Duration::days(7),
        "courier",
        "courier-api",
    );
    claims.iat -= 86_400 * 8;
    claims.nbf -= 86_400 * 8;
    claims.exp = Utc::now().timestamp() - 60;
    let expired = service.encode_jwt(&claims).unwrap();

    assert_token_error(
        service.rotate_access(&expired, 1).await,
        TokenError::Expired,
    );
}

#[tokio::test]
async fn test_revoke_ends_session() {
    let service = create_test_service();
    let pair = service.issue_token_pair(admin()).await.unwrap();

    assert!(service.revoke(1).await.unwrap());
    assert!(!service.revoke(1).await.unwrap());
    assert_token_error(
        service.rotate_access(&pair.refresh_token, 1).await,
        TokenError::SubjectMismatch,
    );
}

#[tokio::test]
async fn test_revoke_leaves_access_token_valid_until_expiry() {
    let service = create_test_service();
    let pair = service.issue_token_pair(admin()).await.unwrap();

    service.revoke(1).await.unwrap();

    assert!(service.verify_access(&pair.access_token).is_ok());
}

#[tokio::test]
async fn test_custom_lifetimes() {
    let config = TokenServiceConfig::new(ACCESS_SECRET, REFRESH_SECRET)
        .unwrap()
        .with_access_expiry(Duration::minutes(5))
        .with_refresh_expiry(Duration::days(1));
    let service = TokenService::new(InMemoryTokenStore::new(), config);

    let pair = service.issue_token_pair(admin()).await.unwrap();
    assert_eq!(pair.access_expires_in, 300);

    let record = service.store().get(1).await.unwrap().unwrap();
    assert!(record.expires_at - Utc::now() <= Duration::days(1));
}
