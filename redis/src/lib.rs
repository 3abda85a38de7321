//! Redis-backed catalog cache.
//!
//! The concert listing is stored under a single key:
//!
//! - **Key**: [`CATALOG_KEY`] (`concerts:all`) → bincode-serialized `Vec<Concert>`
//! - **TTL**: configurable, default 5 minutes
//!
//! The cache is never authoritative. A corrupt entry is reported as
//! [`CacheError::Serialization`] and the caller falls back to the store, whose
//! next `set` overwrites it.
//!
//! # Example
//!
//! ```no_run
//! use concert_booking_redis::RedisCatalogCache;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = RedisCatalogCache::new("redis://127.0.0.1:6379", Duration::from_secs(300)).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use concert_booking_core::Concert;
use concert_booking_core::cache::{CATALOG_KEY, CacheError, CatalogCache};
use futures::future::BoxFuture;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client};
use std::time::Duration;

/// Default lifetime of a cached listing.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Longest wait for a reply to a single command.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Longest wait for one connection attempt.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(2);

const CONNECT_RETRIES: usize = 2;

/// Redis catalog cache with TTL-based expiration.
///
/// Cloning is cheap; clones share the `ConnectionManager`, which reconnects on
/// its own after a dropped connection. Every command gives up after
/// [`RESPONSE_TIMEOUT`], so a stalled server surfaces as
/// [`CacheError::Backend`] instead of hanging the caller.
#[derive(Clone)]
pub struct RedisCatalogCache {
    conn_manager: ConnectionManager,
    ttl: Duration,
}

impl RedisCatalogCache {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Backend`] if the URL is invalid or the first
    /// connection fails or times out.
    pub async fn new(redis_url: &str, ttl: Duration) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Backend(format!("Failed to create Redis client: {e}")))?;

        let config = ConnectionManagerConfig::new()
            .set_response_timeout(RESPONSE_TIMEOUT)
            .set_connection_timeout(CONNECTION_TIMEOUT)
            .set_number_of_retries(CONNECT_RETRIES);
        let conn_manager = ConnectionManager::new_with_config(client, config)
            .await
            .map_err(|e| {
                CacheError::Backend(format!("Failed to create Redis connection manager: {e}"))
            })?;

        tracing::info!(
            ttl_seconds = ttl.as_secs(),
            response_timeout_ms = RESPONSE_TIMEOUT.as_millis(),
            "Connected to Redis"
        );
        Ok(Self { conn_manager, ttl })
    }

    /// Redis rejects a zero expiry, so the TTL is at least one second.
    fn ttl_seconds(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }
}

impl std::fmt::Debug for RedisCatalogCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCatalogCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn backend(error: &redis::RedisError) -> CacheError {
    CacheError::Backend(error.to_string())
}

impl CatalogCache for RedisCatalogCache {
    fn get(&self) -> BoxFuture<'_, Result<Option<Vec<Concert>>, CacheError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let bytes: Option<Vec<u8>> = conn.get(CATALOG_KEY).await.map_err(|e| backend(&e))?;

            let Some(bytes) = bytes else {
                return Ok(None);
            };
            let concerts = bincode::deserialize(&bytes)
                .map_err(|e| CacheError::Serialization(e.to_string()))?;
            Ok(Some(concerts))
        })
    }

    fn set<'a>(&'a self, concerts: &'a [Concert]) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let bytes = bincode::serialize(concerts)
                .map_err(|e| CacheError::Serialization(e.to_string()))?;

            let mut conn = self.conn_manager.clone();
            let ttl_seconds = self.ttl_seconds();
            let _: () = conn
                .set_ex(CATALOG_KEY, bytes, ttl_seconds)
                .await
                .map_err(|e| backend(&e))?;

            tracing::debug!(count = concerts.len(), ttl_seconds, "Catalog cached");
            Ok(())
        })
    }

    fn delete(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: () = conn.del(CATALOG_KEY).await.map_err(|e| backend(&e))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concert_booking_core::ConcertId;
    use concert_booking_testing::fixtures;

    fn concert() -> Concert {
        let new = fixtures::new_concert(100);
        Concert {
            id: ConcertId::new(),
            name: new.name,
            venue: new.venue,
            date: new.date,
            price: new.price,
            total_seats: new.total_seats,
            available_seats: 42,
            created_at: new.date,
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn listing_survives_bincode() {
        let concerts = vec![concert(), concert()];
        let bytes = bincode::serialize(&concerts).unwrap();
        let decoded: Vec<Concert> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, concerts);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn silent_server_fails_instead_of_hanging() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let attempt = async {
            let cache = RedisCatalogCache::new(&format!("redis://{addr}"), DEFAULT_TTL).await?;
            cache.get().await
        };
        let outcome = tokio::time::timeout(Duration::from_secs(15), attempt)
            .await
            .unwrap();
        assert!(matches!(outcome, Err(CacheError::Backend(_))));
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_paused_server_times_out_reads() {
        let cache = RedisCatalogCache::new("redis://127.0.0.1:6379", DEFAULT_TTL)
            .await
            .unwrap();
        let mut admin = cache.conn_manager.clone();
        let _: () = redis::cmd("CLIENT")
            .arg("PAUSE")
            .arg(3_000)
            .query_async(&mut admin)
            .await
            .unwrap();

        let started = std::time::Instant::now();
        assert!(matches!(cache.get().await, Err(CacheError::Backend(_))));
        assert!(started.elapsed() < RESPONSE_TIMEOUT + Duration::from_millis(500));

        tokio::time::sleep(Duration::from_secs(3)).await;
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_redis_catalog_lifecycle() {
        let cache = RedisCatalogCache::new("redis://127.0.0.1:6379", DEFAULT_TTL)
            .await
            .unwrap();
        cache.delete().await.unwrap();
        assert_eq!(cache.get().await.unwrap(), None);

        let concerts = vec![concert()];
        cache.set(&concerts).await.unwrap();
        assert_eq!(cache.get().await.unwrap(), Some(concerts));

        cache.delete().await.unwrap();
        assert_eq!(cache.get().await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_redis_entry_expires() {
        let cache = RedisCatalogCache::new("redis://127.0.0.1:6379", Duration::from_secs(1))
            .await
            .unwrap();
        cache.set(&[concert()]).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(cache.get().await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_corrupt_entry_is_serialization_error() {
        let cache = RedisCatalogCache::new("redis://127.0.0.1:6379", DEFAULT_TTL)
            .await
            .unwrap();
        let mut conn = cache.conn_manager.clone();
        let _: () = conn.set(CATALOG_KEY, b"not bincode".to_vec()).await.unwrap();

        assert!(matches!(cache.get().await, Err(CacheError::Serialization(_))));
        cache.delete().await.unwrap();
    }
}
