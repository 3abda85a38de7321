//! Booking rows in the `bookings` table.

use chrono::{DateTime, Utc};
use concert_booking_core::store::{BookingStore, StoreError};
use concert_booking_core::{
    Booking, BookingId, BookingStatus, ConcertId, NewBooking, SeatNumber, UserId,
};
use futures::future::BoxFuture;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{booking_insert, corrupt, unavailable};
use crate::on_tx_or_pool;
use crate::transaction::PgTx;

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    user_id: Uuid,
    concert_id: Uuid,
    seat_number: i32,
    status: String,
    created_at: DateTime<Utc>,
}

impl BookingRow {
    fn into_booking(self) -> Result<Booking, StoreError> {
        let seat_number = u32::try_from(self.seat_number)
            .ok()
            .and_then(SeatNumber::new)
            .ok_or_else(|| corrupt("seat_number", self.seat_number))?;
        let status = BookingStatus::parse(&self.status).map_err(|e| corrupt("status", e))?;

        Ok(Booking {
            id: BookingId::from_uuid(self.id),
            user_id: UserId::from_uuid(self.user_id),
            concert_id: ConcertId::from_uuid(self.concert_id),
            seat_number,
            status,
            created_at: self.created_at,
        })
    }
}

/// `PostgreSQL` booking store.
///
/// Seat uniqueness is the `bookings_concert_seat_unique` constraint; a
/// violation surfaces as [`StoreError::DuplicateSeat`].
#[derive(Clone, Debug)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Create a store on an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl BookingStore for PostgresBookingStore {
    type Tx = PgTx;

    fn insert<'a>(
        &'a self,
        tx: Option<&'a mut PgTx>,
        booking: NewBooking,
    ) -> BoxFuture<'a, Result<Booking, StoreError>> {
        Box::pin(async move {
            let seat = i32::try_from(booking.seat_number.get())
                .map_err(|_| corrupt("seat_number", booking.seat_number))?;

            let row: BookingRow = on_tx_or_pool!(
                tx,
                &self.pool,
                sqlx::query_as(
                    r"
                    INSERT INTO bookings (user_id, concert_id, seat_number, status)
                    VALUES ($1, $2, $3, $4)
                    RETURNING id, user_id, concert_id, seat_number, status, created_at
                    ",
                )
                .bind(booking.user_id.as_uuid())
                .bind(booking.concert_id.as_uuid())
                .bind(seat)
                .bind(booking.status.as_str()),
                fetch_one
            )
            .map_err(|e| booking_insert(e, booking.concert_id, booking.seat_number))?;

            row.into_booking()
        })
    }

    fn list_by_user<'a>(
        &'a self,
        tx: Option<&'a mut PgTx>,
        user_id: UserId,
    ) -> BoxFuture<'a, Result<Vec<Booking>, StoreError>> {
        Box::pin(async move {
            let rows: Vec<BookingRow> = on_tx_or_pool!(
                tx,
                &self.pool,
                sqlx::query_as(
                    r"
                    SELECT id, user_id, concert_id, seat_number, status, created_at
                    FROM bookings
                    WHERE user_id = $1
                    ORDER BY created_at DESC
                    ",
                )
                .bind(user_id.as_uuid()),
                fetch_all
            )
            .map_err(unavailable)?;

            rows.into_iter().map(BookingRow::into_booking).collect()
        })
    }
}
