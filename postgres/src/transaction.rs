//! Transaction manager over a sqlx pool.

use concert_booking_core::store::{StoreError, TransactionManager};
use futures::future::BoxFuture;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::unavailable;

/// Transaction handle shared by the Postgres stores.
pub type PgTx = Transaction<'static, Postgres>;

/// Opens READ COMMITTED transactions on a pooled connection.
///
/// A handle dropped without commit is rolled back when its connection returns
/// to the pool.
#[derive(Clone, Debug)]
pub struct PostgresTransactionManager {
    pool: PgPool,
}

impl PostgresTransactionManager {
    /// Create a transaction manager on an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl TransactionManager for PostgresTransactionManager {
    type Tx = PgTx;

    fn begin(&self) -> BoxFuture<'_, Result<PgTx, StoreError>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(unavailable)?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
            Ok(tx)
        })
    }

    fn commit(&self, tx: PgTx) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move { tx.commit().await.map_err(unavailable) })
    }

    fn rollback(&self, tx: PgTx) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move { tx.rollback().await.map_err(unavailable) })
    }
}
