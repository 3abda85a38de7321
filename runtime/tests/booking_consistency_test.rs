//! Booking consistency tests against the in-memory backend.
//!
//! Covers the guarantees of the booking path end to end:
//! - seats are never oversold under concurrent requests
//! - a seat number is sold at most once
//! - a failed insert or commit leaves inventory untouched
//! - cache and publish failures never fail a committed booking
//! - notifications reach the subscriber at least once
//!
//! In-memory transactions hold one table lock from begin to commit, so
//! concurrent bookings here run one after another. These runs check the order
//! of the booking steps and their rollback, not row-level atomicity under
//! contention. The Postgres suite covers that with
//! `test_concurrent_bookings_never_oversell` and
//! `test_concurrent_same_seat_sold_once`.
//!
//! Run with: `cargo test -p concert-booking-runtime --test booking_consistency_test`

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use concert_booking_core::store::{InventoryStore, TransactionManager};
use concert_booking_core::{BookingError, BookingStatus, ConcertId, UserId};
use concert_booking_runtime::{
    BookingService, NotificationSubscriber, PublishQueueConfig, PublishWorkers,
    RedeliveryPolicy, spawn_publish_queue,
};
use concert_booking_testing::{
    InMemoryCatalogCache, InMemoryDatabase, InMemoryNotificationLog, ScriptedNotifier, fixtures,
    properties,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

type Service = BookingService<InMemoryDatabase, InMemoryDatabase, InMemoryDatabase>;

struct Harness {
    db: InMemoryDatabase,
    cache: InMemoryCatalogCache,
    log: InMemoryNotificationLog,
    service: Service,
    workers: PublishWorkers,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness_with(config: PublishQueueConfig) -> Harness {
    init_tracing();
    let db = InMemoryDatabase::new();
    let cache = InMemoryCatalogCache::new(Duration::from_secs(300));
    let log = InMemoryNotificationLog::new("bookings.created");
    let (queue, workers) = spawn_publish_queue(Arc::new(log.clone()), config);
    let shared = Arc::new(db.clone());
    let service = BookingService::new(
        Arc::clone(&shared),
        Arc::clone(&shared),
        shared,
        Arc::new(cache.clone()),
        queue,
    );
    Harness {
        db,
        cache,
        log,
        service,
        workers,
    }
}

fn harness() -> Harness {
    harness_with(PublishQueueConfig::default())
}

async fn concert(h: &Harness, total_seats: u32) -> ConcertId {
    h.db.create_concert(None, fixtures::new_concert(total_seats))
        .await
        .unwrap()
        .id
}

async fn wait_for_published(log: &InMemoryNotificationLog, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while log.len() < expected {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("notifications published");
}

// ============================================================================
// Inventory
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_never_oversell() {
    let h = harness();
    let concert_id = concert(&h, 10).await;

    let attempts: Vec<_> = (1..=25)
        .map(|seat| {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .create_booking(UserId::new(), concert_id, fixtures::seat(seat))
                    .await
            })
        })
        .collect();

    let mut confirmed = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => confirmed += 1,
            Err(e) => assert_eq!(e, BookingError::SoldOut(concert_id)),
        }
    }

    assert_eq!(confirmed, 10);
    assert_eq!(h.db.available_seats(concert_id).await, Some(0));
    assert_eq!(h.db.bookings_for(concert_id).await.len(), 10);
}

#[tokio::test]
async fn sold_out_concert_inserts_nothing() {
    let h = harness();
    let concert_id = concert(&h, 5).await;
    h.db.set_available_seats(concert_id, 0).await;

    let result = h
        .service
        .create_booking(UserId::new(), concert_id, fixtures::seat(1))
        .await;

    assert_eq!(result, Err(BookingError::SoldOut(concert_id)));
    assert_eq!(h.db.booking_count().await, 0);
    assert_eq!(h.db.available_seats(concert_id).await, Some(0));
}

#[tokio::test]
async fn unknown_concert_is_sold_out() {
    let h = harness();
    let missing = ConcertId::new();

    let result = h
        .service
        .create_booking(UserId::new(), missing, fixtures::seat(1))
        .await;

    assert_eq!(result, Err(BookingError::SoldOut(missing)));
}

// ============================================================================
// Seat uniqueness
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_seat_is_sold_once() {
    let h = harness();
    let concert_id = concert(&h, 10).await;

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .create_booking(UserId::new(), concert_id, fixtures::seat(5))
                    .await
            })
        })
        .collect();

    let mut confirmed = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => confirmed += 1,
            Err(e) => assert!(matches!(e, BookingError::DuplicateSeat { .. })),
        }
    }

    assert_eq!(confirmed, 1);
    // Every rejected request had its decrement rolled back.
    assert_eq!(h.db.available_seats(concert_id).await, Some(9));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn last_seat_contested_by_two_users() {
    let h = harness();
    let concert_id = concert(&h, 1).await;

    let a = {
        let service = h.service.clone();
        tokio::spawn(async move {
            service
                .create_booking(UserId::new(), concert_id, fixtures::seat(5))
                .await
        })
    };
    let b = {
        let service = h.service.clone();
        tokio::spawn(async move {
            service
                .create_booking(UserId::new(), concert_id, fixtures::seat(5))
                .await
        })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(
        loser,
        BookingError::SoldOut(_) | BookingError::DuplicateSeat { .. }
    ));
    assert_eq!(h.db.available_seats(concert_id).await, Some(0));
}

// ============================================================================
// Atomicity
// ============================================================================

#[tokio::test]
async fn failed_insert_rolls_back_decrement() {
    let h = harness();
    let concert_id = concert(&h, 3).await;
    h.cache.prime(Vec::new());
    h.db.fail_next_insert();

    let result = h
        .service
        .create_booking(UserId::new(), concert_id, fixtures::seat(1))
        .await;

    assert!(matches!(result, Err(BookingError::StoreUnavailable(_))));
    assert_eq!(h.db.available_seats(concert_id).await, Some(3));
    assert_eq!(h.db.booking_count().await, 0);
    // No post-commit work for an aborted booking.
    assert!(h.cache.is_populated());
    h.workers.shutdown(Duration::from_secs(1)).await;
    assert!(h.log.is_empty());
}

#[tokio::test]
async fn failed_commit_is_store_unavailable() {
    let h = harness();
    let concert_id = concert(&h, 3).await;
    h.db.fail_next_commit();

    let result = h
        .service
        .create_booking(UserId::new(), concert_id, fixtures::seat(1))
        .await;

    assert!(matches!(result, Err(BookingError::StoreUnavailable(_))));
    assert_eq!(h.db.available_seats(concert_id).await, Some(3));
    assert_eq!(h.db.booking_count().await, 0);
    h.workers.shutdown(Duration::from_secs(1)).await;
    assert!(h.log.is_empty());
}

#[tokio::test]
async fn unreachable_store_is_store_unavailable() {
    let h = harness();
    let concert_id = concert(&h, 3).await;
    h.db.set_unavailable(true);

    let result = h
        .service
        .create_booking(UserId::new(), concert_id, fixtures::seat(1))
        .await;

    assert!(matches!(result, Err(BookingError::StoreUnavailable(_))));
    assert!(!result.unwrap_err().is_client_error());
}

// ============================================================================
// Post-commit side effects
// ============================================================================

#[tokio::test]
async fn confirmed_booking_invalidates_cache_and_notifies() {
    let h = harness();
    let concert_id = concert(&h, 3).await;
    h.cache.prime(Vec::new());
    let user_id = UserId::new();

    let booking = h
        .service
        .create_booking(user_id, concert_id, fixtures::seat(2))
        .await
        .unwrap();

    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.seat_number, fixtures::seat(2));
    assert!(!h.cache.is_populated());

    wait_for_published(&h.log, 1).await;
    let published = h.log.published();
    assert_eq!(published[0].booking_id, booking.id.to_string());
    assert_eq!(published[0].user_id, user_id.to_string());
    assert_eq!(published[0].concert_id, concert_id.to_string());
    assert_eq!(published[0].seat, 2);
    assert!((published[0].amount - 49.99).abs() < 1e-9);
}

#[tokio::test]
async fn cache_and_publish_failures_do_not_fail_booking() {
    let h = harness();
    let concert_id = concert(&h, 3).await;
    h.cache.prime(Vec::new());
    h.cache.fail_deletes(true);
    h.log.fail_publishes(true);

    let booking = h
        .service
        .create_booking(UserId::new(), concert_id, fixtures::seat(1))
        .await
        .unwrap();

    assert_eq!(h.db.bookings_for(concert_id).await, vec![booking]);
    assert_eq!(h.db.available_seats(concert_id).await, Some(2));
    h.workers.shutdown(Duration::from_secs(1)).await;
    assert_eq!(h.log.publish_attempts(), 1);
    assert!(h.log.is_empty());
}

#[tokio::test]
async fn full_publish_queue_does_not_block_or_fail_bookings() {
    let h = harness_with(PublishQueueConfig {
        capacity: 1,
        workers: 1,
    });
    h.log.pause_publishing();
    let concert_id = concert(&h, 10).await;

    for seat in 1..=5 {
        tokio::time::timeout(
            Duration::from_secs(1),
            h.service
                .create_booking(UserId::new(), concert_id, fixtures::seat(seat)),
        )
        .await
        .expect("booking does not wait for the publisher")
        .unwrap();
    }

    assert_eq!(h.db.available_seats(concert_id).await, Some(5));
    h.log.resume_publishing();
    h.workers.shutdown(Duration::from_secs(1)).await;
    // One in flight plus one queued; the rest were dropped.
    assert!(h.log.len() <= 2);
}

// ============================================================================
// Caller-owned transactions
// ============================================================================

#[tokio::test]
async fn booking_inside_outer_transaction_waits_for_caller() {
    let h = harness();
    let concert_id = concert(&h, 3).await;
    h.cache.prime(Vec::new());

    let mut tx = h.db.begin().await.unwrap();
    let (booking, effects) = h
        .service
        .create_booking_in(&mut tx, UserId::new(), concert_id, fixtures::seat(1))
        .await
        .unwrap();
    assert_eq!(effects.notification().booking_id, booking.id.to_string());
    assert!(h.cache.is_populated());

    h.db.commit(tx).await.unwrap();
    effects.fire().await;

    assert!(!h.cache.is_populated());
    assert_eq!(h.db.available_seats(concert_id).await, Some(2));
    wait_for_published(&h.log, 1).await;
}

#[tokio::test]
async fn abandoned_outer_transaction_discards_booking() {
    let h = harness();
    let concert_id = concert(&h, 3).await;

    let mut tx = h.db.begin().await.unwrap();
    let (_booking, effects) = h
        .service
        .create_booking_in(&mut tx, UserId::new(), concert_id, fixtures::seat(1))
        .await
        .unwrap();
    h.db.rollback(tx).await.unwrap();
    drop(effects);

    assert_eq!(h.db.available_seats(concert_id).await, Some(3));
    assert_eq!(h.db.booking_count().await, 0);
}

#[tokio::test]
async fn user_bookings_are_newest_first() {
    let h = harness();
    let concert_id = concert(&h, 3).await;
    let user_id = UserId::new();

    let first = h
        .service
        .create_booking(user_id, concert_id, fixtures::seat(1))
        .await
        .unwrap();
    let second = h
        .service
        .create_booking(user_id, concert_id, fixtures::seat(2))
        .await
        .unwrap();
    h.service
        .create_booking(UserId::new(), concert_id, fixtures::seat(3))
        .await
        .unwrap();

    let ids: Vec<_> = h
        .service
        .user_bookings(user_id)
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(ids, vec![second.id, first.id]);
}

// ============================================================================
// End to end delivery
// ============================================================================

#[tokio::test]
async fn notification_is_delivered_at_least_once() {
    let h = harness();
    let concert_id = concert(&h, 3).await;
    let notifier = ScriptedNotifier::failing_times(1);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let subscriber = NotificationSubscriber::new(
        Arc::new(h.log.clone()),
        Arc::new(notifier.clone()),
        shutdown_rx,
    )
    .with_policy(RedeliveryPolicy::Unbounded)
    .spawn();

    let booking = h
        .service
        .create_booking(UserId::new(), concert_id, fixtures::seat(1))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.log.acked_offsets().is_empty() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
    shutdown_tx.send(()).unwrap();
    subscriber.await.unwrap();

    assert_eq!(notifier.calls(), 2);
    assert_eq!(notifier.delivered()[0].booking_id, booking.id.to_string());
    assert_eq!(h.log.acked_offsets(), vec![0]);
    assert_eq!(h.log.committed_offset(), 1);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn confirmed_bookings_never_exceed_capacity((capacity, demand) in properties::capacity_and_demand()) {
        let (confirmed, remaining) = tokio_test::block_on(async {
            let h = harness();
            let concert_id = concert(&h, capacity).await;

            let mut confirmed = 0u32;
            for seat in 1..=demand {
                let seat = u32::try_from(seat).unwrap();
                if h.service
                    .create_booking(UserId::new(), concert_id, fixtures::seat(seat))
                    .await
                    .is_ok()
                {
                    confirmed += 1;
                }
            }
            let remaining = h.db.available_seats(concert_id).await.unwrap();
            h.workers.shutdown(Duration::from_secs(1)).await;
            (confirmed, remaining)
        });

        let demand = u32::try_from(demand).unwrap();
        prop_assert_eq!(confirmed, capacity.min(demand));
        prop_assert_eq!(remaining, capacity - confirmed);
    }

    #[test]
    fn repeated_seat_never_double_books(seat in properties::seat_number(50), repeats in 1usize..6) {
        let (confirmed, bookings) = tokio_test::block_on(async {
            let h = harness();
            let concert_id = concert(&h, 50).await;

            let mut confirmed = 0usize;
            for _ in 0..repeats {
                if h.service.create_booking(UserId::new(), concert_id, seat).await.is_ok() {
                    confirmed += 1;
                }
            }
            let bookings = h.db.bookings_for(concert_id).await.len();
            h.workers.shutdown(Duration::from_secs(1)).await;
            (confirmed, bookings)
        });

        prop_assert_eq!(confirmed, 1);
        prop_assert_eq!(bookings, 1);
    }
}
