//! Wiring of the production backends.
//!
//! Each `build_*` function connects to what it needs, retrying the initial
//! connection with backoff so the processes tolerate starting before their
//! dependencies.

use concert_booking_core::cache::CacheError;
use concert_booking_core::store::StoreError;
use concert_booking_postgres::{
    DeadLetterQueue, PostgresBookingStore, PostgresConcertStore, PostgresTransactionManager,
};
use concert_booking_redis::RedisCatalogCache;
use concert_booking_redpanda::{RedpandaError, RedpandaNotificationLog, RedpandaPublisher};
use concert_booking_runtime::metrics::{MetricsError, MetricsServer};
use concert_booking_runtime::retry::{RetryPolicy, retry_with_backoff};
use concert_booking_runtime::{
    BookingService, CatalogService, NotificationSubscriber, PublishWorkers, RedeliveryPolicy,
    spawn_publish_queue,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::Config;
use crate::notifier::LoggingNotifier;

/// Booking service over the `PostgreSQL` stores.
pub type PgBookingService =
    BookingService<PostgresTransactionManager, PostgresConcertStore, PostgresBookingStore>;

/// Catalog service over the `PostgreSQL` inventory.
pub type PgCatalogService = CatalogService<PostgresConcertStore>;

/// Errors raised while starting a process.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// `PostgreSQL` could not be reached or prepared.
    #[error("PostgreSQL: {0}")]
    Store(#[from] StoreError),

    /// Redis could not be reached.
    #[error("Redis: {0}")]
    Cache(#[from] CacheError),

    /// A Redpanda client could not be created.
    #[error("Redpanda: {0}")]
    Redpanda(#[from] RedpandaError),

    /// The metrics exporter could not be started.
    #[error("Metrics: {0}")]
    Metrics(#[from] MetricsError),
}

fn startup_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(5)
        .initial_delay(Duration::from_millis(500))
        .max_delay(Duration::from_secs(10))
        .multiplier(2.0)
        .build()
}

async fn connect_postgres(config: &Config) -> Result<PgPool, BootstrapError> {
    let settings = config.postgres.pool_settings();
    let pool = retry_with_backoff(startup_retry(), "connect to PostgreSQL", || {
        concert_booking_postgres::connect(&settings)
    })
    .await?;
    concert_booking_postgres::apply_schema(&pool).await?;
    Ok(pool)
}

/// The booking process: services ready to serve requests plus the workers
/// publishing their notifications.
pub struct BookingApp {
    /// Seat reservation
    pub bookings: PgBookingService,
    /// Concert listing and lookup
    pub catalog: PgCatalogService,
    /// Publish queue workers, drained on shutdown
    pub publish_workers: PublishWorkers,
    /// Prometheus exporter
    pub metrics: MetricsServer,
}

impl std::fmt::Debug for BookingApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingApp")
            .field("publish_workers", &self.publish_workers)
            .finish_non_exhaustive()
    }
}

/// Connect every backend of the booking process and start its workers.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns [`BootstrapError`] if a backend stays unreachable after the
/// startup retries, or if the metrics exporter cannot start.
pub async fn build_booking_app(config: &Config) -> Result<BookingApp, BootstrapError> {
    let mut metrics = MetricsServer::new(config.server.metrics_addr);
    metrics.start()?;

    let pool = connect_postgres(config).await?;
    let inventory = Arc::new(PostgresConcertStore::new(pool.clone()));

    let redis_url = config.redis.url.clone();
    let ttl = config.redis.catalog_ttl;
    let cache = Arc::new(
        retry_with_backoff(startup_retry(), "connect to Redis", || {
            RedisCatalogCache::new(&redis_url, ttl)
        })
        .await?,
    );

    let publisher = RedpandaPublisher::builder()
        .brokers(&config.redpanda.brokers)
        .topic(&config.redpanda.topic)
        .producer_acks(&config.redpanda.producer_acks)
        .timeout(config.redpanda.publish_timeout)
        .build()?;
    let (queue, publish_workers) = spawn_publish_queue(Arc::new(publisher), config.publish_queue);

    let bookings = BookingService::new(
        Arc::new(PostgresTransactionManager::new(pool.clone())),
        Arc::clone(&inventory),
        Arc::new(PostgresBookingStore::new(pool)),
        Arc::<RedisCatalogCache>::clone(&cache),
        queue,
    );
    let catalog = CatalogService::new(inventory, cache);

    info!(
        topic = %config.redpanda.topic,
        queue_capacity = config.publish_queue.capacity,
        publish_workers = config.publish_queue.workers,
        "Booking service ready"
    );

    Ok(BookingApp {
        bookings,
        catalog,
        publish_workers,
        metrics,
    })
}

/// Build the notification subscriber of the consumer process.
///
/// With `REDELIVERY_MAX_ATTEMPTS` unset every failure is redelivered
/// immediately; otherwise failures back off and exhausted messages are
/// parked in the `PostgreSQL` dead letter table.
///
/// # Errors
///
/// Returns [`BootstrapError`] if the consumer cannot be created, or if the
/// dead letter table is configured but unreachable.
pub async fn build_subscriber(
    config: &Config,
    shutdown: broadcast::Receiver<()>,
) -> Result<NotificationSubscriber, BootstrapError> {
    let log = RedpandaNotificationLog::builder()
        .brokers(&config.redpanda.brokers)
        .topic(&config.redpanda.topic)
        .consumer_group(&config.redpanda.consumer_group)
        .auto_offset_reset(&config.redpanda.auto_offset_reset)
        .build()?;

    let policy = match config.subscriber.max_attempts {
        None => RedeliveryPolicy::Unbounded,
        Some(max_attempts) => {
            let pool = connect_postgres(config).await?;
            RedeliveryPolicy::Bounded {
                max_attempts,
                backoff: config.subscriber.retry_policy(),
                dead_letters: Arc::new(DeadLetterQueue::new(pool)),
            }
        },
    };
    info!(
        consumer_group = %config.redpanda.consumer_group,
        policy = ?policy,
        "Notification subscriber ready"
    );

    Ok(NotificationSubscriber::new(
        Arc::new(log),
        Arc::new(LoggingNotifier::default()),
        shutdown,
    )
    .with_name(config.redpanda.consumer_group.clone())
    .with_policy(policy))
}
