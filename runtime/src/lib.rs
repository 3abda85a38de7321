//! # Concert Booking Runtime
//!
//! Orchestration for the concert booking backend.
//!
//! This crate wires the capability traits from `concert-booking-core` into the
//! booking consistency path and its background workers.
//!
//! ## Core Components
//!
//! - **Transaction coordinator** ([`transaction::run_in_transaction`]): one
//!   transaction handle shared by every store call of a unit of work
//! - **Booking orchestrator** ([`BookingService`]): decrement, insert, commit,
//!   then invalidate and notify
//! - **Catalog service** ([`CatalogService`]): read-through concert listing
//! - **Publish queue** ([`publish_queue`]): bounded queue and worker pool that
//!   publishes notifications off the request path
//! - **Subscriber** ([`NotificationSubscriber`]): at-least-once consumer loop
//!
//! ## Example
//!
//! ```ignore
//! use concert_booking_runtime::{BookingService, publish_queue};
//!
//! let (queue, workers) = publish_queue::spawn_publish_queue(publisher, config);
//! let bookings = BookingService::new(db.clone(), db.clone(), db, cache, queue);
//!
//! let booking = bookings.create_booking(user_id, concert_id, seat).await?;
//!
//! // On shutdown
//! workers.shutdown(Duration::from_secs(10)).await;
//! ```

/// Booking orchestration
pub mod booking;

/// Catalog reads and concert creation
pub mod catalog;

/// Prometheus metrics for observability
pub mod metrics;

/// Bounded notification publishing
pub mod publish_queue;

/// Retry logic with exponential backoff
pub mod retry;

/// At-least-once notification consumer
pub mod subscriber;

/// Transaction coordination
pub mod transaction;

pub use booking::{BookingService, PendingSideEffects};
pub use catalog::CatalogService;
pub use publish_queue::{PublishQueue, PublishQueueConfig, PublishWorkers, spawn_publish_queue};
pub use subscriber::{NotificationSubscriber, RedeliveryPolicy};
pub use transaction::run_in_transaction;
