//! Transaction coordination for store calls that must commit together.
//!
//! [`run_in_transaction`] gives a unit of work one transaction handle and
//! commits or rolls back based on the outcome:
//!
//! - `scope = None` begins a new transaction, commits on `Ok`, rolls back on
//!   `Err` and returns the error unchanged
//! - `scope = Some(outer)` runs the work on the outer transaction and leaves
//!   commit and rollback to whoever opened it (no nested transactions)
//!
//! The work closure receives the handle explicitly and passes it to every
//! store call, the same way sqlx's `Connection::transaction` does.
//!
//! # Example
//!
//! ```ignore
//! let price = run_in_transaction(&*db, None, move |tx| {
//!     Box::pin(async move {
//!         let price = inventory.decrement_seat(Some(&mut *tx), concert_id).await?;
//!         bookings.insert(Some(tx), new_booking).await?;
//!         Ok::<_, BookingError>(price)
//!     })
//! })
//! .await?;
//! ```

use concert_booking_core::store::{StoreError, TransactionManager};
use futures::future::BoxFuture;

/// Run `work` inside a transaction.
///
/// # Errors
///
/// - any error returned by `work`, unchanged (the transaction is rolled back
///   when this call opened it)
/// - [`StoreError::Unavailable`] (converted into `E`) if begin or commit fails
pub async fn run_in_transaction<M, F, T, E>(
    manager: &M,
    scope: Option<&mut M::Tx>,
    work: F,
) -> Result<T, E>
where
    M: TransactionManager + ?Sized,
    F: for<'t> FnOnce(&'t mut M::Tx) -> BoxFuture<'t, Result<T, E>>,
    E: From<StoreError> + std::fmt::Display,
{
    if let Some(outer) = scope {
        return work(outer).await;
    }

    let mut tx = manager.begin().await?;
    let outcome = work(&mut tx).await;

    match outcome {
        Ok(value) => {
            manager.commit(tx).await?;
            Ok(value)
        },
        Err(err) => {
            if let Err(rollback_err) = manager.rollback(tx).await {
                // The store discards uncommitted work when the connection goes back.
                tracing::warn!(
                    error = %err,
                    rollback_error = %rollback_err,
                    "Rollback failed after aborted transaction"
                );
            }
            Err(err)
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use concert_booking_core::store::InventoryStore;
    use concert_booking_testing::{InMemoryDatabase, fixtures};
    use std::sync::Arc;

    #[tokio::test]
    async fn commits_when_work_succeeds() {
        let db = Arc::new(InMemoryDatabase::new());
        let concert = db.create_concert(None, fixtures::new_concert(2)).await.unwrap();

        let store = Arc::clone(&db);
        run_in_transaction(&*db, None, move |tx| {
            Box::pin(async move {
                store.decrement_seat(Some(tx), concert.id).await?;
                Ok::<_, StoreError>(())
            })
        })
        .await
        .unwrap();

        assert_eq!(db.available_seats(concert.id).await, Some(1));
        assert_eq!(db.transactions_committed(), 1);
    }

    #[tokio::test]
    async fn rolls_back_and_returns_work_error() {
        let db = Arc::new(InMemoryDatabase::new());
        let concert = db.create_concert(None, fixtures::new_concert(2)).await.unwrap();

        let store = Arc::clone(&db);
        let result = run_in_transaction(&*db, None, move |tx| {
            Box::pin(async move {
                store.decrement_seat(Some(tx), concert.id).await?;
                Err::<(), _>(StoreError::Unavailable("boom".to_string()))
            })
        })
        .await;

        assert_eq!(result, Err(StoreError::Unavailable("boom".to_string())));
        assert_eq!(db.available_seats(concert.id).await, Some(2));
        assert_eq!(db.transactions_rolled_back(), 1);
    }

    #[tokio::test]
    async fn commit_failure_is_unavailable() {
        let db = Arc::new(InMemoryDatabase::new());
        let concert = db.create_concert(None, fixtures::new_concert(2)).await.unwrap();
        db.fail_next_commit();

        let store = Arc::clone(&db);
        let result = run_in_transaction(&*db, None, move |tx| {
            Box::pin(async move {
                store.decrement_seat(Some(tx), concert.id).await?;
                Ok::<_, StoreError>(())
            })
        })
        .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(db.available_seats(concert.id).await, Some(2));
    }

    #[tokio::test]
    async fn outer_scope_is_left_open() {
        let db = Arc::new(InMemoryDatabase::new());
        let concert = db.create_concert(None, fixtures::new_concert(2)).await.unwrap();
        let mut outer = db.begin().await.unwrap();

        let store = Arc::clone(&db);
        run_in_transaction(&*db, Some(&mut outer), move |tx| {
            Box::pin(async move {
                store.decrement_seat(Some(tx), concert.id).await?;
                Ok::<_, StoreError>(())
            })
        })
        .await
        .unwrap();

        assert_eq!(db.transactions_begun(), 1);
        assert_eq!(db.transactions_committed(), 0);

        // Abandoning the outer transaction discards the inner work too.
        drop(outer);
        assert_eq!(db.available_seats(concert.id).await, Some(2));
    }
}
