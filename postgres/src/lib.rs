//! `PostgreSQL` stores for the concert booking backend.
//!
//! Implements the store traits from `concert-booking-core` on top of a shared
//! sqlx [`PgPool`]:
//!
//! - [`PostgresTransactionManager`]: READ COMMITTED transactions handed out as
//!   explicit [`PgTx`] handles
//! - [`PostgresConcertStore`]: seat inventory and the conditional decrement
//! - [`PostgresBookingStore`]: booking rows, unique per (concert, seat)
//! - [`DeadLetterQueue`]: the `failed_notifications` table
//!
//! The schema lives in `migrations/` and is exposed as [`SCHEMA`].
//!
//! # Example
//!
//! ```no_run
//! use concert_booking_postgres::{PoolSettings, PostgresConcertStore, connect};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = connect(&PoolSettings::new("postgres://localhost/concerts")).await?;
//! let concerts = PostgresConcertStore::new(pool);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Run a query on the caller's transaction if there is one, else on the pool.
macro_rules! on_tx_or_pool {
    ($tx:expr, $pool:expr, $query:expr, $method:ident) => {
        match $tx {
            Some(tx) => $query.$method(&mut **tx).await,
            None => $query.$method($pool).await,
        }
    };
}
pub(crate) use on_tx_or_pool;

mod booking_store;
mod concert_store;
pub mod dead_letter_queue;
mod error;
mod transaction;

pub use booking_store::PostgresBookingStore;
pub use concert_store::PostgresConcertStore;
pub use dead_letter_queue::{DLQStatus, DeadLetterQueue, FailedNotification};
pub use transaction::{PgTx, PostgresTransactionManager};

use concert_booking_core::store::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// DDL for concerts, bookings and failed notifications.
pub const SCHEMA: &str = include_str!("../migrations/0001_concert_booking.sql");

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// `postgres://` connection string
    pub url: String,
    /// Upper bound on open connections
    pub max_connections: u32,
    /// Connections kept open when idle
    pub min_connections: u32,
    /// How long to wait for a connection
    pub connect_timeout: Duration,
}

impl PoolSettings {
    /// Settings for `url` with default pool sizes (10 max, 2 min, 30 s timeout).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if the database cannot be reached.
pub async fn connect(settings: &PoolSettings) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.connect_timeout)
        .connect(&settings.url)
        .await
        .map_err(error::unavailable)?;

    tracing::info!(
        max_connections = settings.max_connections,
        min_connections = settings.min_connections,
        "Connected to PostgreSQL"
    );
    Ok(pool)
}

/// Apply [`SCHEMA`]. Every statement is idempotent.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if any statement fails.
pub async fn apply_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(error::unavailable)?;
    Ok(())
}
