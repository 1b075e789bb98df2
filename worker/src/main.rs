//! Courier worker
//!
//! Connects to the broker and processes work items until interrupted.

mod telemetry;

use anyhow::Context;
use courier_core::QueueMessage;
use courier_infra::queue::{AmqpBroker, QueueClient, QueueConnection};
use courier_shared::config::AppConfig;
use tracing::{error, info};

/// Default processing: record the work item
async fn process(message: QueueMessage) -> anyhow::Result<()> {
    info!(
        sender = %message.sender,
        enqueued_at = %message.timestamp,
        content = %message.content,
        "Processing work item"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;
    telemetry::init(&config.logging);

    info!(
        environment = %config.environment,
        queue = %config.broker.queue_name,
        dead_letter_queue = %config.broker.dead_letter_queue,
        "Starting Courier worker"
    );

    let broker = AmqpBroker::new(config.broker.url.clone());
    let connection = QueueConnection::new(broker, config.broker.clone());
    let client = QueueClient::new(connection.clone());

    let consumer = {
        let client = client.clone();
        tokio::spawn(async move { client.consume(process).await })
    };

    connection
        .stay_connected(tokio::signal::ctrl_c())
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    connection.close().await;

    match consumer.await {
        Ok(Ok(())) => info!("Worker stopped"),
        Ok(Err(e)) => error!(error = %e, "Consumer failed"),
        Err(e) => error!(error = %e, "Consumer task panicked"),
    }

    Ok(())
}
