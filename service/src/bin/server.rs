//! Booking server
//!
//! Connects the stores, the catalog cache and the notification publisher,
//! then runs until Ctrl+C or SIGTERM. On shutdown the publish queue is drained
//! so confirmed bookings still get their notification.
//!
//! # Usage
//!
//! ```bash
//! docker compose up -d
//! cargo run --bin server
//! ```

use concert_booking_service::lifecycle::shutdown_signal;
use concert_booking_service::{Config, build_booking_app, init_tracing};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    tracing::info!("Starting concert booking server...");

    let config = Config::from_env()?;
    tracing::info!(
        redpanda = %config.redpanda.brokers,
        topic = %config.redpanda.topic,
        metrics = %config.server.metrics_addr,
        "Configuration loaded"
    );

    let app = build_booking_app(&config).await?;
    let concerts = app.catalog.list_concerts().await?;
    tracing::info!(concerts = concerts.len(), "Concert booking server is running");

    shutdown_signal().await;

    tracing::info!("Shutting down...");
    app.publish_workers
        .shutdown(config.server.shutdown_timeout)
        .await;
    tracing::info!("Server stopped");

    Ok(())
}
