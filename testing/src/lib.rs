//! # Concert Booking Testing
//!
//! Testing utilities for the concert booking backend.
//!
//! This crate provides:
//! - In-memory implementations of every capability trait, with failure
//!   injection ([`InMemoryDatabase`], [`InMemoryCatalogCache`],
//!   [`InMemoryNotificationLog`], [`ScriptedNotifier`], [`InMemoryDeadLetters`])
//! - A deterministic clock
//! - Fixtures and property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use concert_booking_testing::{InMemoryDatabase, InMemoryCatalogCache, fixtures};
//!
//! #[tokio::test]
//! async fn books_a_seat() {
//!     let db = InMemoryDatabase::new();
//!     let concert = db.create_concert(None, fixtures::new_concert(10)).await.unwrap();
//!     let service = BookingService::new(db.clone(), db.clone(), db.clone(), cache, queue);
//!
//!     let booking = service
//!         .create_booking(UserId::new(), concert.id, fixtures::seat(1))
//!         .await
//!         .unwrap();
//!     assert_eq!(db.available_seats(concert.id).await, Some(9));
//! }
//! ```

pub mod cache;
pub mod database;
pub mod log;

use chrono::{DateTime, Utc};
use concert_booking_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use concert_booking_testing::mocks::FixedClock;
    /// use concert_booking_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::days(20_089))
    }
}

/// Fixtures for common test data.
pub mod fixtures {
    use super::mocks::test_clock;
    use super::Clock;
    use concert_booking_core::{Money, NewConcert, SeatNumber};

    /// A concert with `total_seats` seats at 49.99, one month after the test clock.
    #[must_use]
    pub fn new_concert(total_seats: u32) -> NewConcert {
        NewConcert {
            name: "The Rolling Codes".to_string(),
            venue: "Madison Square Garden".to_string(),
            date: test_clock().now() + chrono::Duration::days(30),
            price: Money::from_cents(4_999),
            total_seats,
        }
    }

    /// Seat `number`, clamped to at least 1.
    #[must_use]
    pub fn seat(number: u32) -> SeatNumber {
        SeatNumber::new(number.max(1)).unwrap_or(SeatNumber::MIN)
    }
}

/// Property-based testing strategies using proptest.
pub mod properties {
    use concert_booking_core::SeatNumber;
    use proptest::prelude::*;

    /// Any valid seat number up to `max`.
    pub fn seat_number(max: u32) -> impl Strategy<Value = SeatNumber> {
        (1..=max.max(1)).prop_map(|n| SeatNumber::new(n).unwrap_or(SeatNumber::MIN))
    }

    /// Concert capacity and a number of booking attempts, possibly exceeding it.
    pub fn capacity_and_demand() -> impl Strategy<Value = (u32, usize)> {
        (0u32..8).prop_flat_map(|capacity| (Just(capacity), 0usize..16))
    }
}

// Re-export commonly used items
pub use cache::InMemoryCatalogCache;
pub use database::{InMemoryDatabase, InMemoryTx};
pub use log::{DeadLetter, InMemoryDeadLetters, InMemoryNotificationLog, ScriptedNotifier};
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_clock_is_new_year_2025() {
        let now = test_clock().now();
        assert_eq!((now.year(), now.month(), now.day()), (2025, 1, 1));
        assert_eq!(now, test_clock().now());
    }
}
