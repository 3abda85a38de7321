//! Seat inventory in the `concerts` table.

use chrono::{DateTime, Utc};
use concert_booking_core::store::{InventoryStore, StoreError};
use concert_booking_core::{Concert, ConcertId, Money, NewConcert};
use futures::future::BoxFuture;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{corrupt, unavailable};
use crate::on_tx_or_pool;
use crate::transaction::PgTx;

const CONCERT_COLUMNS: &str =
    "id, name, venue, date, price_cents, total_seats, available_seats, created_at";

#[derive(sqlx::FromRow)]
struct ConcertRow {
    id: Uuid,
    name: String,
    venue: String,
    date: DateTime<Utc>,
    price_cents: i64,
    total_seats: i32,
    available_seats: i32,
    created_at: DateTime<Utc>,
}

impl ConcertRow {
    fn into_concert(self) -> Result<Concert, StoreError> {
        Ok(Concert {
            id: ConcertId::from_uuid(self.id),
            name: self.name,
            venue: self.venue,
            date: self.date,
            price: price_from_cents(self.price_cents)?,
            total_seats: u32::try_from(self.total_seats)
                .map_err(|_| corrupt("total_seats", self.total_seats))?,
            available_seats: u32::try_from(self.available_seats)
                .map_err(|_| corrupt("available_seats", self.available_seats))?,
            created_at: self.created_at,
        })
    }
}

fn price_from_cents(cents: i64) -> Result<Money, StoreError> {
    u64::try_from(cents)
        .map(Money::from_cents)
        .map_err(|_| corrupt("price_cents", cents))
}

/// `PostgreSQL` inventory store.
#[derive(Clone, Debug)]
pub struct PostgresConcertStore {
    pool: PgPool,
}

impl PostgresConcertStore {
    /// Create a store on an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl InventoryStore for PostgresConcertStore {
    type Tx = PgTx;

    fn decrement_seat<'a>(
        &'a self,
        tx: Option<&'a mut PgTx>,
        concert_id: ConcertId,
    ) -> BoxFuture<'a, Result<Money, StoreError>> {
        Box::pin(async move {
            let price: Option<i64> = on_tx_or_pool!(
                tx,
                &self.pool,
                sqlx::query_scalar(
                    r"
                    UPDATE concerts
                    SET available_seats = available_seats - 1
                    WHERE id = $1 AND available_seats > 0
                    RETURNING price_cents
                    ",
                )
                .bind(concert_id.as_uuid()),
                fetch_optional
            )
            .map_err(unavailable)?;

            match price {
                Some(cents) => price_from_cents(cents),
                None => Err(StoreError::NoSeatsAvailable(concert_id)),
            }
        })
    }

    fn create_concert<'a>(
        &'a self,
        tx: Option<&'a mut PgTx>,
        concert: NewConcert,
    ) -> BoxFuture<'a, Result<Concert, StoreError>> {
        Box::pin(async move {
            let seats = i32::try_from(concert.total_seats)
                .map_err(|_| corrupt("total_seats", concert.total_seats))?;
            let price = i64::try_from(concert.price.cents())
                .map_err(|_| corrupt("price", concert.price))?;

            let sql = format!(
                "INSERT INTO concerts (name, venue, date, price_cents, total_seats, available_seats)
                 VALUES ($1, $2, $3, $4, $5, $5)
                 RETURNING {CONCERT_COLUMNS}"
            );
            let row: ConcertRow = on_tx_or_pool!(
                tx,
                &self.pool,
                sqlx::query_as(&sql)
                    .bind(&concert.name)
                    .bind(&concert.venue)
                    .bind(concert.date)
                    .bind(price)
                    .bind(seats),
                fetch_one
            )
            .map_err(unavailable)?;

            row.into_concert()
        })
    }

    fn get_concert<'a>(
        &'a self,
        tx: Option<&'a mut PgTx>,
        concert_id: ConcertId,
    ) -> BoxFuture<'a, Result<Concert, StoreError>> {
        Box::pin(async move {
            let sql = format!("SELECT {CONCERT_COLUMNS} FROM concerts WHERE id = $1");
            let row: Option<ConcertRow> = on_tx_or_pool!(
                tx,
                &self.pool,
                sqlx::query_as(&sql).bind(concert_id.as_uuid()),
                fetch_optional
            )
            .map_err(unavailable)?;

            row.ok_or(StoreError::NotFound(concert_id))?.into_concert()
        })
    }

    fn list_concerts<'a>(
        &'a self,
        tx: Option<&'a mut PgTx>,
    ) -> BoxFuture<'a, Result<Vec<Concert>, StoreError>> {
        Box::pin(async move {
            let sql = format!("SELECT {CONCERT_COLUMNS} FROM concerts ORDER BY date ASC");
            let rows: Vec<ConcertRow> =
                on_tx_or_pool!(tx, &self.pool, sqlx::query_as(&sql), fetch_all)
                    .map_err(unavailable)?;

            rows.into_iter().map(ConcertRow::into_concert).collect()
        })
    }
}
