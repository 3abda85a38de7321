//! # Concert Booking Core
//!
//! Domain types and capability traits for the concert booking backend.
//!
//! The interesting part of this system is the booking consistency path: a seat
//! reservation must atomically decrement finite inventory, record the booking
//! exactly once, invalidate the catalog cache and notify downstream consumers
//! without blocking the caller. This crate defines the vocabulary for that path;
//! the orchestration lives in `concert-booking-runtime` and the backends live in
//! the `postgres`, `redis` and `redpanda` crates.
//!
//! ## Capabilities
//!
//! Every external system is one small trait:
//!
//! - [`store::TransactionManager`] - opens, commits and rolls back transactions
//! - [`store::InventoryStore`] - seat capacity with an atomic conditional decrement
//! - [`store::BookingStore`] - append-only booking records, unique per seat
//! - [`cache::CatalogCache`] - disposable snapshot of the concert catalog
//! - [`notification::NotificationPublisher`] - appends booking notifications to a log
//! - [`notification::NotificationLog`] - consumer side of the same log
//! - [`notification::NotificationHandler`] - the subscriber's side effect
//! - [`notification::DeadLetterSink`] - parking lot for notifications that never succeed
//!
//! Store calls take the transaction handle explicitly (`Option<&mut Tx>`);
//! `None` runs the statement on the pool.
//!
//! ## Dyn Compatibility
//!
//! All traits return boxed futures instead of using `async fn` so they can be
//! held as `Arc<dyn Trait>` by services and background workers.

pub mod booking;
pub mod cache;
pub mod notification;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use futures::future::BoxFuture;

pub use booking::BookingError;
pub use types::{
    Booking, BookingId, BookingStatus, Concert, ConcertId, Money, NewBooking, NewConcert,
    SeatNumber, UserId,
};

/// Environment module - injected dependencies that are not stores.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Stores that assign timestamps themselves (Postgres uses `now()`) do not
    /// need a clock; in-memory stores take one so tests stay deterministic.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
