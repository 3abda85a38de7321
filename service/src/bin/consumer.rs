//! Notification consumer
//!
//! Reads booking notifications from the log and notifies users, committing
//! each message only after its notification went out.
//!
//! # Usage
//!
//! ```bash
//! REDELIVERY_MAX_ATTEMPTS=5 cargo run --bin consumer
//! ```

use concert_booking_service::lifecycle::{await_task, shutdown_signal};
use concert_booking_service::{Config, build_subscriber, init_tracing};
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    tracing::info!("Starting notification consumer...");

    let config = Config::from_env()?;
    tracing::info!(
        redpanda = %config.redpanda.brokers,
        topic = %config.redpanda.topic,
        consumer_group = %config.redpanda.consumer_group,
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let subscriber = build_subscriber(&config, shutdown_rx).await?.spawn();
    tracing::info!("Notification consumer is running");

    shutdown_signal().await;

    tracing::info!("Shutting down...");
    let _ = shutdown_tx.send(());
    await_task("notification-subscriber", subscriber, config.server.shutdown_timeout).await;
    tracing::info!("Consumer stopped");

    Ok(())
}
