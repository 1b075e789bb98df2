//! End-to-end flow: authenticate, enqueue work, consume it

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use courier_core::repositories::{InMemoryTokenStore, InMemoryUserDirectory};
    use courier_core::services::{AuthService, TokenService, TokenServiceConfig};
    use courier_core::{QueueMessage, UserAccount};
    use courier_infra::queue::{ConnectionState, InMemoryBroker, QueueClient, QueueConnection};
    use courier_shared::config::{BrokerConfig, JwtConfig};

    fn auth_service() -> AuthService<InMemoryUserDirectory, InMemoryTokenStore> {
        let users = InMemoryUserDirectory::new([
            UserAccount::with_password(1, "admin", "123456", "admin", 4).unwrap(),
            UserAccount::with_password(2, "user", "123456", "user", 4).unwrap(),
        ]);
        let jwt = JwtConfig::new(
            "end-to-end-access-secret-0123456789abcdef",
            "end-to-end-refresh-secret-0123456789abcde",
        )
        .unwrap();
        let tokens = TokenService::new(
            InMemoryTokenStore::new(),
            TokenServiceConfig::from_jwt_config(&jwt).unwrap(),
        );
        AuthService::new(Arc::new(users), Arc::new(tokens))
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_publish_and_consume() {
        let auth = auth_service();
        let login = auth.login("admin", "123456").await.unwrap();
        let claims = auth.verify(&login.tokens.access_token).unwrap();
        assert_eq!(claims.identity.role, "admin");

        let broker = InMemoryBroker::new();
        broker.fail_next_opens(1);
        let connection = QueueConnection::new(broker.clone(), BrokerConfig::new("memory://"));
        let client = QueueClient::new(connection.clone());

        // Not connected yet: publish reports failure instead of raising.
        assert!(
            !client
                .publish(&QueueMessage::new("hello", Some(claims.identity.username.clone())))
                .await
        );

        // The first attempt fails; the scheduled retry connects on its own.
        connection.connect().await;
        let mut state = connection.subscribe();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        assert_eq!(broker.open_attempts(), 2);

        let grant = auth.refresh(&login.tokens.refresh_token, 1).await.unwrap();
        let rotated = auth.verify(&grant.access_token).unwrap();
        assert_eq!(rotated.identity, claims.identity);

        let received = Arc::new(Mutex::new(Vec::new()));
        let consumer = {
            let client = client.clone();
            let received = Arc::clone(&received);
            tokio::spawn(async move {
                client
                    .consume(move |message: QueueMessage| {
                        let received = Arc::clone(&received);
                        async move {
                            received.lock().unwrap().push(message);
                            Ok::<(), anyhow::Error>(())
                        }
                    })
                    .await
            })
        };

        assert!(
            client
                .publish(&QueueMessage::new("hello", Some(rotated.identity.username.clone())))
                .await
        );

        for _ in 0..1_000 {
            if broker.ack_count() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        {
            let received = received.lock().unwrap();
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].content, "hello");
            assert_eq!(received[0].sender, "admin");
        }

        connection.close().await;
        consumer.await.unwrap().unwrap();
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_rejected_login_does_not_open_session() {
        let auth = auth_service();

        assert!(auth.login("admin", "wrong").await.is_err());
        assert!(!auth.logout(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_unconfigured_cache_falls_back_to_memory_store() {
        let store = courier_infra::token_store(None).await.unwrap();
        let jwt = JwtConfig::new(
            "end-to-end-access-secret-0123456789abcdef",
            "end-to-end-refresh-secret-0123456789abcde",
        )
        .unwrap();
        let tokens = TokenService::new(store, TokenServiceConfig::from_jwt_config(&jwt).unwrap());

        let pair = tokens
            .issue_token_pair(courier_core::Identity::new(3, "ops", "user"))
            .await
            .unwrap();
        assert!(tokens.rotate_access(&pair.refresh_token, 3).await.is_ok());
        assert!(tokens.revoke(3).await.unwrap());
    }
}
