//! Redpanda transport for booking notifications.
//!
//! Uses rdkafka, so any Kafka-compatible broker works (Redpanda, Apache Kafka,
//! AWS MSK, ...).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  BookingService  │
//! └────────┬─────────┘
//!          │ commit, then enqueue
//!          ▼
//! ┌──────────────────┐
//! │  Publish queue   │
//! └────────┬─────────┘
//!          │ RedpandaPublisher (key = booking id, JSON payload)
//!          ▼
//! ┌──────────────────┐
//! │ bookings.created │◄─── Durable log
//! └────────┬─────────┘
//!          │ RedpandaNotificationLog (consumer group, manual commits)
//!          ▼
//! ┌──────────────────┐
//! │    Subscriber    │
//! └──────────────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - `enable.auto.commit` is off; an offset is committed only by
//!   [`NotificationLog::ack`](concert_booking_core::notification::NotificationLog::ack)
//! - a message that is not acknowledged is fetched again, either after an
//!   explicit redelivery (seek) or after a restart or rebalance
//! - handlers must tolerate duplicates
//! - ordering holds within a partition; all messages of one booking share a
//!   partition because the key is the booking id
//!
//! # Example
//!
//! ```no_run
//! use concert_booking_redpanda::{RedpandaNotificationLog, RedpandaPublisher};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let publisher = RedpandaPublisher::builder()
//!     .brokers("localhost:9092")
//!     .topic("bookings.created")
//!     .build()?;
//!
//! let log = RedpandaNotificationLog::builder()
//!     .brokers("localhost:9092")
//!     .topic("bookings.created")
//!     .consumer_group("notification-service")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod consumer;
mod publisher;

pub use consumer::{RedpandaNotificationLog, RedpandaNotificationLogBuilder};
pub use publisher::{RedpandaPublisher, RedpandaPublisherBuilder};

use thiserror::Error;

/// Default topic for booking notifications.
pub const DEFAULT_TOPIC: &str = "bookings.created";

/// Errors raised while building a producer or consumer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RedpandaError {
    /// A required setting was not provided.
    #[error("Redpanda configuration error: {0}")]
    Configuration(String),

    /// The client could not be created or subscribed.
    #[error("Redpanda connection failed: {0}")]
    ConnectionFailed(String),
}
