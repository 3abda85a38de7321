//! Booking orchestration.
//!
//! # Flow
//!
//! ```text
//! create_booking(user, concert, seat)
//!   ┌─ transaction ───────────────────────────────┐
//!   │ 1. decrement_seat   (zero rows → SoldOut)    │
//!   │ 2. insert booking   (unique → DuplicateSeat) │
//!   └─ commit             (failure → Unavailable) ─┘
//!   3. invalidate catalog cache   (logged on failure)
//!   4. enqueue notification       (logged on failure)
//! ```
//!
//! Steps 1 and 2 commit together or not at all. Steps 3 and 4 run only after
//! the commit and can never turn a confirmed booking into a failure.
//!
//! There is no in-process locking: concurrent requests for the same concert
//! are serialized by the store's conditional decrement and the (concert, seat)
//! uniqueness constraint.

use concert_booking_core::cache::CatalogCache;
use concert_booking_core::notification::BookingCreated;
use concert_booking_core::store::{BookingStore, InventoryStore, TransactionManager};
use concert_booking_core::{
    Booking, BookingError, ConcertId, Money, NewBooking, SeatNumber, UserId,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::metrics::BookingMetrics;
use crate::publish_queue::PublishQueue;
use crate::transaction::run_in_transaction;

/// Post-commit work of a booking: cache invalidation and notification.
///
/// Returned by [`BookingService::create_booking_in`], whose caller owns the
/// transaction. Fire it only after that transaction has committed; drop it if
/// the transaction is rolled back.
#[must_use = "side effects must be fired after the surrounding transaction commits"]
pub struct PendingSideEffects {
    notification: BookingCreated,
    cache: Arc<dyn CatalogCache>,
    publish_queue: PublishQueue,
}

impl PendingSideEffects {
    /// The notification that will be published.
    #[must_use]
    pub const fn notification(&self) -> &BookingCreated {
        &self.notification
    }

    /// Invalidate the catalog cache and enqueue the notification.
    ///
    /// Never fails; problems are logged.
    pub async fn fire(self) {
        if let Err(e) = self.cache.delete().await {
            warn!(
                booking_id = %self.notification.booking_id,
                concert_id = %self.notification.concert_id,
                error = %e,
                "Failed to invalidate catalog cache after booking"
            );
        }

        let booking_id = self.notification.booking_id.clone();
        if let Err(e) = self.publish_queue.enqueue(self.notification) {
            BookingMetrics::record_publish_failed();
            warn!(
                booking_id = %booking_id,
                error = %e,
                "Booking notification dropped"
            );
        }
    }
}

impl std::fmt::Debug for PendingSideEffects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSideEffects")
            .field("notification", &self.notification)
            .finish_non_exhaustive()
    }
}

/// Booking orchestrator.
///
/// Generic over the transaction manager and the two stores, which must share
/// the manager's transaction handle type.
pub struct BookingService<M, I, B>
where
    M: TransactionManager + ?Sized,
    I: InventoryStore<Tx = M::Tx> + ?Sized,
    B: BookingStore<Tx = M::Tx> + ?Sized,
{
    transactions: Arc<M>,
    inventory: Arc<I>,
    bookings: Arc<B>,
    cache: Arc<dyn CatalogCache>,
    publish_queue: PublishQueue,
}

impl<M, I, B> Clone for BookingService<M, I, B>
where
    M: TransactionManager + ?Sized,
    I: InventoryStore<Tx = M::Tx> + ?Sized,
    B: BookingStore<Tx = M::Tx> + ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            transactions: Arc::clone(&self.transactions),
            inventory: Arc::clone(&self.inventory),
            bookings: Arc::clone(&self.bookings),
            cache: Arc::clone(&self.cache),
            publish_queue: self.publish_queue.clone(),
        }
    }
}

impl<M, I, B> BookingService<M, I, B>
where
    M: TransactionManager + ?Sized,
    I: InventoryStore<Tx = M::Tx> + ?Sized + 'static,
    B: BookingStore<Tx = M::Tx> + ?Sized + 'static,
{
    /// Create a booking service.
    #[must_use]
    pub fn new(
        transactions: Arc<M>,
        inventory: Arc<I>,
        bookings: Arc<B>,
        cache: Arc<dyn CatalogCache>,
        publish_queue: PublishQueue,
    ) -> Self {
        Self {
            transactions,
            inventory,
            bookings,
            cache,
            publish_queue,
        }
    }

    /// Book one seat of a concert for a user.
    ///
    /// Returns once the booking is committed. The `BookingCreated`
    /// notification is queued for the background publisher, so the caller
    /// may see the confirmed booking before it is published. A publish that
    /// fails or is dropped is logged and counted in the publish metrics but
    /// never turns into an error here.
    ///
    /// # Errors
    ///
    /// - [`BookingError::SoldOut`] if no seat is left (or the concert does not
    ///   exist); nothing is written
    /// - [`BookingError::DuplicateSeat`] if the seat number is taken; the
    ///   decrement is rolled back
    /// - [`BookingError::StoreUnavailable`] on any other persistence failure,
    ///   including a failed commit
    pub async fn create_booking(
        &self,
        user_id: UserId,
        concert_id: ConcertId,
        seat_number: SeatNumber,
    ) -> Result<Booking, BookingError> {
        let start = Instant::now();
        let (booking, price) = self
            .book(None, user_id, concert_id, seat_number)
            .await
            .inspect_err(|e| Self::log_rejection(e, concert_id, seat_number))?;

        BookingMetrics::record_created(start.elapsed());
        info!(
            booking_id = %booking.id,
            user_id = %user_id,
            concert_id = %concert_id,
            seat = %seat_number,
            "Booking confirmed"
        );

        self.side_effects(&booking, price).fire().await;
        Ok(booking)
    }

    /// Book one seat inside a transaction owned by the caller.
    ///
    /// Neither commits nor rolls back. The returned [`PendingSideEffects`] must
    /// be fired after the caller commits.
    ///
    /// # Errors
    ///
    /// Same as [`create_booking`](Self::create_booking), except that commit
    /// failures are the caller's to observe. On error the caller should roll
    /// back its transaction.
    pub async fn create_booking_in(
        &self,
        tx: &mut M::Tx,
        user_id: UserId,
        concert_id: ConcertId,
        seat_number: SeatNumber,
    ) -> Result<(Booking, PendingSideEffects), BookingError> {
        let (booking, price) = self
            .book(Some(tx), user_id, concert_id, seat_number)
            .await
            .inspect_err(|e| Self::log_rejection(e, concert_id, seat_number))?;

        debug!(
            booking_id = %booking.id,
            concert_id = %concert_id,
            "Booking written to caller's transaction"
        );
        let effects = self.side_effects(&booking, price);
        Ok((booking, effects))
    }

    /// All bookings of a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::StoreUnavailable`] if the query fails.
    pub async fn user_bookings(&self, user_id: UserId) -> Result<Vec<Booking>, BookingError> {
        Ok(self.bookings.list_by_user(None, user_id).await?)
    }

    async fn book(
        &self,
        scope: Option<&mut M::Tx>,
        user_id: UserId,
        concert_id: ConcertId,
        seat_number: SeatNumber,
    ) -> Result<(Booking, Money), BookingError> {
        let inventory = Arc::clone(&self.inventory);
        let bookings = Arc::clone(&self.bookings);

        run_in_transaction(&*self.transactions, scope, move |tx| {
            Box::pin(async move {
                let price = inventory.decrement_seat(Some(&mut *tx), concert_id).await?;
                let booking = bookings
                    .insert(Some(tx), NewBooking::confirmed(user_id, concert_id, seat_number))
                    .await?;
                Ok::<_, BookingError>((booking, price))
            })
        })
        .await
    }

    fn side_effects(&self, booking: &Booking, price: Money) -> PendingSideEffects {
        PendingSideEffects {
            notification: BookingCreated::from_booking(booking, price),
            cache: Arc::clone(&self.cache),
            publish_queue: self.publish_queue.clone(),
        }
    }

    fn log_rejection(error: &BookingError, concert_id: ConcertId, seat_number: SeatNumber) {
        BookingMetrics::record_rejected(error.code());
        if error.is_client_error() {
            info!(
                concert_id = %concert_id,
                seat = %seat_number,
                reason = error.code(),
                "Booking rejected"
            );
        } else {
            warn!(
                concert_id = %concert_id,
                seat = %seat_number,
                error = %error,
                "Booking failed"
            );
        }
    }
}
