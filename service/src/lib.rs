//! Process wiring for the concert booking backend.
//!
//! Two binaries share this crate:
//!
//! - `server` connects `PostgreSQL`, Redis and Redpanda, builds the booking and
//!   catalog services and keeps the publish queue running until shutdown
//! - `consumer` runs the notification subscriber against the booking topic
//!
//! # Configuration
//!
//! Both read their settings from the environment (and a `.env` file when
//! present); see [`Config`].
//!
//! ```bash
//! docker compose up -d
//! cargo run --bin server
//! cargo run --bin consumer
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod config;
pub mod lifecycle;
pub mod notifier;

pub use bootstrap::{BookingApp, BootstrapError, build_booking_app, build_subscriber};
pub use config::{Config, ConfigError};
pub use notifier::LoggingNotifier;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber, honouring `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,concert_booking=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
