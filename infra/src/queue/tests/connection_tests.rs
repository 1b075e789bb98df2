//! Supervisor behaviour against the in-process broker

use std::time::Duration;

use courier_shared::config::BrokerConfig;
use tokio::time::Instant;

use crate::queue::{ConnectionState, InMemoryBroker, QueueConnection};

fn config() -> BrokerConfig {
    BrokerConfig::new("memory://")
        .with_retry_delays(5_000, 60_000)
        .with_max_connect_attempts(4)
}

async fn wait_for_state(connection: &QueueConnection, expected: ConnectionState) {
    let mut state = connection.subscribe();
    tokio::time::timeout(Duration::from_secs(3_600), state.wait_for(|s| *s == expected))
        .await
        .expect("state not reached in time")
        .expect("state channel closed");
}

#[tokio::test(start_paused = true)]
async fn test_connect_reaches_connected_and_declares_queues() {
    let broker = InMemoryBroker::new();
    let connection = QueueConnection::new(broker.clone(), config());
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    connection.connect().await;
    wait_for_state(&connection, ConnectionState::Connected).await;

    assert!(broker.has_queue("message_queue").await);
    assert!(broker.has_queue("message_queue.dead-letter").await);
    assert_eq!(broker.open_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_first_attempt_failure_retries_after_base_delay() {
    let broker = InMemoryBroker::new();
    broker.fail_next_opens(1);
    let connection = QueueConnection::new(broker.clone(), config());

    let started = Instant::now();
    connection.connect().await;
    assert_ne!(connection.state(), ConnectionState::Connected);

    wait_for_state(&connection, ConnectionState::Connected).await;

    assert_eq!(broker.open_attempts(), 2);
    assert!(started.elapsed() >= Duration::from_millis(5_000));
    assert!(started.elapsed() < Duration::from_millis(10_000));
}

#[tokio::test(start_paused = true)]
async fn test_connect_is_idempotent() {
    let broker = InMemoryBroker::new();
    broker.fail_next_opens(2);
    let connection = QueueConnection::new(broker.clone(), config());

    connection.connect().await;
    connection.connect().await;
    connection.clone().connect().await;
    wait_for_state(&connection, ConnectionState::Connected).await;
    connection.connect().await;

    assert_eq!(broker.open_attempts(), 3);
    assert_eq!(broker.open_links().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_attempts_then_restarts() {
    let broker = InMemoryBroker::new();
    broker.fail_next_opens(100);
    let connection = QueueConnection::new(broker.clone(), config());
    let mut state = connection.subscribe();

    connection.connect().await;
    state
        .wait_for(|s| *s == ConnectionState::Connecting)
        .await
        .unwrap();
    state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();
    assert_eq!(broker.open_attempts(), 4);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(broker.open_attempts(), 4);

    broker.fail_next_opens(0);
    connection.connect().await;
    wait_for_state(&connection, ConnectionState::Connected).await;
    assert_eq!(broker.open_attempts(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_link_drop() {
    let broker = InMemoryBroker::new();
    let connection = QueueConnection::new(broker.clone(), config());
    connection.connect().await;
    wait_for_state(&connection, ConnectionState::Connected).await;

    let mut state = connection.subscribe();
    broker.drop_links().await;

    let probe = broker.clone();
    tokio::time::timeout(
        Duration::from_secs(3_600),
        state.wait_for(|s| *s == ConnectionState::Connected && probe.open_attempts() == 2),
    )
    .await
    .expect("did not reconnect")
    .unwrap();

    assert_eq!(broker.open_links().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_broken_report_racing_a_drop_does_not_cycle_the_next_link() {
    let broker = InMemoryBroker::new();
    let connection = QueueConnection::new(broker.clone(), config());
    connection.connect().await;
    wait_for_state(&connection, ConnectionState::Connected).await;

    for round in 2..=21u32 {
        let channel = connection.channel().await.expect("connected");
        let mut state = connection.subscribe();

        // The link closes and its consumer reports it broken before the
        // supervisor gets to run.
        broker.drop_links().await;
        connection.report_broken(&channel).await;

        let opened = broker.clone();
        tokio::time::timeout(
            Duration::from_secs(3_600),
            state.wait_for(|s| *s == ConnectionState::Connected && opened.open_attempts() == round),
        )
        .await
        .expect("did not reconnect")
        .unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(broker.open_attempts(), round, "healthy link was torn down");
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert_eq!(broker.open_links().await, 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_stay_connected_starts_over_after_giving_up() {
    let broker = InMemoryBroker::new();
    broker.fail_next_opens(6);
    let connection = QueueConnection::new(broker.clone(), config());
    let mut state = connection.subscribe();

    let (stop, stopped) = tokio::sync::oneshot::channel::<&'static str>();
    let keeper = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.stay_connected(stopped).await })
    };

    // Four failures exhaust the first supervisor; the second fails twice more
    // and then connects.
    let opened = broker.clone();
    tokio::time::timeout(
        Duration::from_secs(3_600),
        state.wait_for(|s| *s == ConnectionState::Connected && opened.open_attempts() == 7),
    )
    .await
    .expect("did not recover from the outage")
    .unwrap();

    stop.send("stop").unwrap();
    assert_eq!(keeper.await.unwrap().unwrap(), "stop");
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(broker.open_links().await, 1);

    connection.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_stay_connected_stops_restarting_after_close() {
    let broker = InMemoryBroker::new();
    broker.fail_next_opens(100);
    let connection = QueueConnection::new(broker.clone(), config());

    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let keeper = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.stay_connected(stopped).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    connection.close().await;
    tokio::time::sleep(Duration::from_secs(600)).await;
    let attempts = broker.open_attempts();
    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(broker.open_attempts(), attempts);
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    stop.send(()).unwrap();
    keeper.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_close_tears_down_link() {
    let broker = InMemoryBroker::new();
    let connection = QueueConnection::new(broker.clone(), config());
    connection.connect().await;
    wait_for_state(&connection, ConnectionState::Connected).await;

    connection.close().await;

    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(connection.is_closing());
    assert_eq!(broker.open_links().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_during_backoff_stops_retrying() {
    let broker = InMemoryBroker::new();
    broker.fail_next_opens(100);
    let connection = QueueConnection::new(broker.clone(), config());

    connection.connect().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.open_attempts(), 1);

    connection.close().await;
    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(broker.open_attempts(), 1);
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_close_without_connect_is_harmless() {
    let connection = QueueConnection::new(InMemoryBroker::new(), config());
    connection.close().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}
