//! Store abstractions for seat inventory and bookings.
//!
//! # Design
//!
//! Two durable stores take part in a booking:
//!
//! - [`InventoryStore`] owns `available_seats` and exposes a single atomic
//!   conditional decrement. It is the only correctness anchor for the seat
//!   count; no caller may read the remaining seats and then write.
//! - [`BookingStore`] appends booking rows and enforces one booking per
//!   (concert, seat number). It is the safety net for seat identity.
//!
//! Both must hold at once: the decrement protects how many seats are sold, the
//! uniqueness constraint protects which seats are sold.
//!
//! # Transactions
//!
//! A [`TransactionManager`] hands out an explicit transaction handle
//! (`Self::Tx`). Every store operation takes `Option<&mut Tx>`:
//!
//! - `Some(tx)` runs the statement on that transaction's connection
//! - `None` runs it on the default pooled connection
//!
//! There is no ambient transaction state; a store call participates in a
//! transaction only if the handle is passed to it.
//!
//! # Implementations
//!
//! - `PostgresTransactionManager`, `PostgresConcertStore`, `PostgresBookingStore`
//!   (in `concert-booking-postgres`): production
//! - `InMemoryDatabase` (in `concert-booking-testing`): deterministic tests with
//!   fault injection

use crate::types::{Booking, Concert, ConcertId, Money, NewBooking, NewConcert, SeatNumber, UserId};
use futures::future::BoxFuture;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The conditional decrement affected zero rows.
    ///
    /// Either the concert does not exist or it is sold out; the two are not
    /// distinguished to keep the decrement a single round trip.
    #[error("No seats available for concert {0}")]
    NoSeatsAvailable(ConcertId),

    /// The (concert, seat) uniqueness constraint was violated.
    #[error("Seat {seat} is already booked for concert {concert_id}")]
    DuplicateSeat {
        /// The concert
        concert_id: ConcertId,
        /// The contested seat
        seat: SeatNumber,
    },

    /// Lookup of a concert that does not exist.
    #[error("Concert not found: {0}")]
    NotFound(ConcertId),

    /// Any other persistence failure (connectivity, commit, corrupt row).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Opens and finishes transactions.
///
/// Isolation is READ COMMITTED. That is sufficient because the decrement's
/// correctness comes from its `available_seats > 0` predicate evaluated by the
/// store, not from serializable isolation; concurrent bookings serialize on
/// the concert row.
pub trait TransactionManager: Send + Sync {
    /// Transaction handle passed explicitly to store operations.
    type Tx: Send + 'static;

    /// Begin a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if no connection can be obtained.
    fn begin(&self) -> BoxFuture<'_, Result<Self::Tx, StoreError>>;

    /// Commit a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the commit fails. The work done in
    /// the transaction must then be treated as not applied.
    fn commit(&self, tx: Self::Tx) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Roll back a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the rollback statement fails.
    /// The store still discards the work when the connection is released.
    fn rollback(&self, tx: Self::Tx) -> BoxFuture<'_, Result<(), StoreError>>;
}

/// Seat inventory per concert.
pub trait InventoryStore: Send + Sync {
    /// Transaction handle type shared with the [`TransactionManager`].
    type Tx: Send + 'static;

    /// Atomically claim one seat of a concert.
    ///
    /// Runs a single conditional update
    /// (`available_seats = available_seats - 1 WHERE id = $1 AND available_seats > 0`)
    /// and succeeds only if exactly one row was affected. Returns the
    /// concert's unit price, read by the same statement.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NoSeatsAvailable`] if zero rows were affected
    /// - [`StoreError::Unavailable`] on any other failure
    fn decrement_seat<'a>(
        &'a self,
        tx: Option<&'a mut Self::Tx>,
        concert_id: ConcertId,
    ) -> BoxFuture<'a, Result<Money, StoreError>>;

    /// Create a concert with all seats available.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the insert fails.
    fn create_concert<'a>(
        &'a self,
        tx: Option<&'a mut Self::Tx>,
        concert: NewConcert,
    ) -> BoxFuture<'a, Result<Concert, StoreError>>;

    /// Load one concert.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the concert does not exist
    /// - [`StoreError::Unavailable`] on any other failure
    fn get_concert<'a>(
        &'a self,
        tx: Option<&'a mut Self::Tx>,
        concert_id: ConcertId,
    ) -> BoxFuture<'a, Result<Concert, StoreError>>;

    /// Load all concerts ordered by date.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the query fails.
    fn list_concerts<'a>(
        &'a self,
        tx: Option<&'a mut Self::Tx>,
    ) -> BoxFuture<'a, Result<Vec<Concert>, StoreError>>;
}

/// Append-only booking records.
pub trait BookingStore: Send + Sync {
    /// Transaction handle type shared with the [`TransactionManager`].
    type Tx: Send + 'static;

    /// Insert a booking; the store assigns its id and creation time.
    ///
    /// # Errors
    ///
    /// - [`StoreError::DuplicateSeat`] if the seat is already booked
    /// - [`StoreError::NotFound`] if the concert does not exist
    /// - [`StoreError::Unavailable`] on any other failure
    fn insert<'a>(
        &'a self,
        tx: Option<&'a mut Self::Tx>,
        booking: NewBooking,
    ) -> BoxFuture<'a, Result<Booking, StoreError>>;

    /// All bookings of a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the query fails.
    fn list_by_user<'a>(
        &'a self,
        tx: Option<&'a mut Self::Tx>,
        user_id: UserId,
    ) -> BoxFuture<'a, Result<Vec<Booking>, StoreError>>;
}
