//! In-memory database for booking tests.
//!
//! [`InMemoryDatabase`] implements [`TransactionManager`], [`InventoryStore`]
//! and [`BookingStore`] over one set of tables, with the same observable
//! semantics as the Postgres backend:
//!
//! - the seat decrement is a single conditional step under the table lock
//! - bookings are unique per (concert, seat)
//! - work done in a transaction is undone unless it is committed
//!
//! A transaction holds the table lock for its whole lifetime, so concurrent
//! transactions serialize. Dropping an [`InMemoryTx`] without committing rolls
//! it back, like returning an unfinished sqlx transaction to the pool.
//!
//! Faults can be injected to exercise the rollback and error paths.

use chrono::{DateTime, Utc};
use concert_booking_core::environment::Clock;
use concert_booking_core::store::{BookingStore, InventoryStore, StoreError, TransactionManager};
use concert_booking_core::{
    Booking, BookingId, Concert, ConcertId, Money, NewBooking, NewConcert, UserId,
};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::mocks::test_clock;

#[derive(Debug, Default)]
struct Tables {
    concerts: HashMap<ConcertId, Concert>,
    // Insertion order, oldest first.
    bookings: Vec<Booking>,
}

impl Tables {
    fn decrement(&mut self, concert_id: ConcertId) -> Result<Money, StoreError> {
        match self.concerts.get_mut(&concert_id) {
            Some(concert) if concert.available_seats > 0 => {
                concert.available_seats -= 1;
                Ok(concert.price)
            },
            _ => Err(StoreError::NoSeatsAvailable(concert_id)),
        }
    }

    fn insert_booking(
        &mut self,
        booking: NewBooking,
        created_at: DateTime<Utc>,
    ) -> Result<Booking, StoreError> {
        if !self.concerts.contains_key(&booking.concert_id) {
            return Err(StoreError::NotFound(booking.concert_id));
        }
        let taken = self
            .bookings
            .iter()
            .any(|b| b.concert_id == booking.concert_id && b.seat_number == booking.seat_number);
        if taken {
            return Err(StoreError::DuplicateSeat {
                concert_id: booking.concert_id,
                seat: booking.seat_number,
            });
        }

        let stored = Booking {
            id: BookingId::new(),
            user_id: booking.user_id,
            concert_id: booking.concert_id,
            seat_number: booking.seat_number,
            status: booking.status,
            created_at,
        };
        self.bookings.push(stored.clone());
        Ok(stored)
    }

    fn insert_concert(&mut self, concert: NewConcert, created_at: DateTime<Utc>) -> Concert {
        let stored = Concert {
            id: ConcertId::new(),
            name: concert.name,
            venue: concert.venue,
            date: concert.date,
            price: concert.price,
            total_seats: concert.total_seats,
            available_seats: concert.total_seats,
            created_at,
        };
        self.concerts.insert(stored.id, stored.clone());
        stored
    }

    fn concert(&self, concert_id: ConcertId) -> Result<Concert, StoreError> {
        self.concerts
            .get(&concert_id)
            .cloned()
            .ok_or(StoreError::NotFound(concert_id))
    }

    fn concerts_by_date(&self) -> Vec<Concert> {
        let mut concerts: Vec<Concert> = self.concerts.values().cloned().collect();
        concerts.sort_by_key(|c| (c.date, c.created_at));
        concerts
    }

    fn bookings_of(&self, user_id: UserId) -> Vec<Booking> {
        let mut bookings: Vec<Booking> = self
            .bookings
            .iter()
            .rev()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        // Stable: equal timestamps keep newest-inserted first.
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bookings
    }

    fn undo(&mut self, step: Undo) {
        match step {
            Undo::RestoreSeat(concert_id) => {
                if let Some(concert) = self.concerts.get_mut(&concert_id) {
                    concert.available_seats += 1;
                }
            },
            Undo::RemoveBooking(booking_id) => self.bookings.retain(|b| b.id != booking_id),
            Undo::RemoveConcert(concert_id) => {
                self.concerts.remove(&concert_id);
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Undo {
    RestoreSeat(ConcertId),
    RemoveBooking(BookingId),
    RemoveConcert(ConcertId),
}

/// Transaction handle of [`InMemoryDatabase`].
///
/// Holds the table lock until committed or dropped.
#[derive(Debug)]
pub struct InMemoryTx {
    tables: OwnedMutexGuard<Tables>,
    undo: Vec<Undo>,
}

impl InMemoryTx {
    fn record(&mut self, step: Undo) {
        self.undo.push(step);
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        while let Some(step) = self.undo.pop() {
            self.tables.undo(step);
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    fail_next_insert: AtomicBool,
    fail_next_commit: AtomicBool,
}

#[derive(Debug, Default)]
struct Counters {
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
}

/// In-memory implementation of the booking stores and transaction manager.
///
/// Cloning shares the same tables.
///
/// # Example
///
/// ```
/// use concert_booking_testing::{InMemoryDatabase, fixtures};
/// use concert_booking_core::store::InventoryStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let db = InMemoryDatabase::new();
/// let concert = db.create_concert(None, fixtures::new_concert(2)).await?;
///
/// db.decrement_seat(None, concert.id).await?;
/// assert_eq!(db.available_seats(concert.id).await, Some(1));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryDatabase {
    tables: Arc<Mutex<Tables>>,
    clock: Arc<dyn Clock>,
    faults: Arc<Faults>,
    counters: Arc<Counters>,
}

impl InMemoryDatabase {
    /// Create an empty database using the fixed test clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(test_clock()))
    }

    /// Create an empty database that timestamps rows with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            clock,
            faults: Arc::new(Faults::default()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Make every operation fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next booking insert with [`StoreError::Unavailable`].
    pub fn fail_next_insert(&self) {
        self.faults.fail_next_insert.store(true, Ordering::SeqCst);
    }

    /// Fail the next commit; the transaction is rolled back.
    pub fn fail_next_commit(&self) {
        self.faults.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Remaining seats of a concert, read outside any transaction.
    pub async fn available_seats(&self, concert_id: ConcertId) -> Option<u32> {
        self.tables
            .lock()
            .await
            .concerts
            .get(&concert_id)
            .map(|c| c.available_seats)
    }

    /// Overwrite the remaining seats of a concert.
    ///
    /// Test setup only; production code never writes the seat count directly.
    pub async fn set_available_seats(&self, concert_id: ConcertId, seats: u32) {
        if let Some(concert) = self.tables.lock().await.concerts.get_mut(&concert_id) {
            concert.available_seats = seats.min(concert.total_seats);
        }
    }

    /// All bookings of a concert, oldest first.
    pub async fn bookings_for(&self, concert_id: ConcertId) -> Vec<Booking> {
        self.tables
            .lock()
            .await
            .bookings
            .iter()
            .filter(|b| b.concert_id == concert_id)
            .cloned()
            .collect()
    }

    /// Number of booking rows across all concerts.
    pub async fn booking_count(&self) -> usize {
        self.tables.lock().await.bookings.len()
    }

    /// Transactions begun so far.
    #[must_use]
    pub fn transactions_begun(&self) -> usize {
        self.counters.begun.load(Ordering::SeqCst)
    }

    /// Transactions committed so far.
    #[must_use]
    pub fn transactions_committed(&self) -> usize {
        self.counters.committed.load(Ordering::SeqCst)
    }

    /// Transactions explicitly rolled back so far.
    #[must_use]
    pub fn transactions_rolled_back(&self) -> usize {
        self.counters.rolled_back.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("database unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDatabase")
            .field("faults", &self.faults)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl TransactionManager for InMemoryDatabase {
    type Tx = InMemoryTx;

    fn begin(&self) -> BoxFuture<'_, Result<InMemoryTx, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            let tables = Arc::clone(&self.tables).lock_owned().await;
            self.counters.begun.fetch_add(1, Ordering::SeqCst);
            Ok(InMemoryTx {
                tables,
                undo: Vec::new(),
            })
        })
    }

    fn commit(&self, mut tx: InMemoryTx) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            if self.faults.fail_next_commit.swap(false, Ordering::SeqCst) {
                // Dropping `tx` applies its undo log.
                drop(tx);
                return Err(StoreError::Unavailable("commit failed".to_string()));
            }
            self.check_available()?;
            tx.undo.clear();
            self.counters.committed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn rollback(&self, tx: InMemoryTx) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            drop(tx);
            self.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

impl InventoryStore for InMemoryDatabase {
    type Tx = InMemoryTx;

    fn decrement_seat<'a>(
        &'a self,
        tx: Option<&'a mut InMemoryTx>,
        concert_id: ConcertId,
    ) -> BoxFuture<'a, Result<Money, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            match tx {
                Some(tx) => {
                    let price = tx.tables.decrement(concert_id)?;
                    tx.record(Undo::RestoreSeat(concert_id));
                    Ok(price)
                },
                None => self.tables.lock().await.decrement(concert_id),
            }
        })
    }

    fn create_concert<'a>(
        &'a self,
        tx: Option<&'a mut InMemoryTx>,
        concert: NewConcert,
    ) -> BoxFuture<'a, Result<Concert, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            let now = self.clock.now();
            match tx {
                Some(tx) => {
                    let created = tx.tables.insert_concert(concert, now);
                    tx.record(Undo::RemoveConcert(created.id));
                    Ok(created)
                },
                None => Ok(self.tables.lock().await.insert_concert(concert, now)),
            }
        })
    }

    fn get_concert<'a>(
        &'a self,
        tx: Option<&'a mut InMemoryTx>,
        concert_id: ConcertId,
    ) -> BoxFuture<'a, Result<Concert, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            match tx {
                Some(tx) => tx.tables.concert(concert_id),
                None => self.tables.lock().await.concert(concert_id),
            }
        })
    }

    fn list_concerts<'a>(
        &'a self,
        tx: Option<&'a mut InMemoryTx>,
    ) -> BoxFuture<'a, Result<Vec<Concert>, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            match tx {
                Some(tx) => Ok(tx.tables.concerts_by_date()),
                None => Ok(self.tables.lock().await.concerts_by_date()),
            }
        })
    }
}

impl BookingStore for InMemoryDatabase {
    type Tx = InMemoryTx;

    fn insert<'a>(
        &'a self,
        tx: Option<&'a mut InMemoryTx>,
        booking: NewBooking,
    ) -> BoxFuture<'a, Result<Booking, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            if self.faults.fail_next_insert.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Unavailable("insert failed".to_string()));
            }
            let now = self.clock.now();
            match tx {
                Some(tx) => {
                    let stored = tx.tables.insert_booking(booking, now)?;
                    tx.record(Undo::RemoveBooking(stored.id));
                    Ok(stored)
                },
                None => self.tables.lock().await.insert_booking(booking, now),
            }
        })
    }

    fn list_by_user<'a>(
        &'a self,
        tx: Option<&'a mut InMemoryTx>,
        user_id: UserId,
    ) -> BoxFuture<'a, Result<Vec<Booking>, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            match tx {
                Some(tx) => Ok(tx.tables.bookings_of(user_id)),
                None => Ok(self.tables.lock().await.bookings_of(user_id)),
            }
        })
    }
}
