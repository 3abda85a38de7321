//! In-memory catalog cache with TTL and failure injection.

use concert_booking_core::Concert;
use concert_booking_core::cache::{CacheError, CatalogCache};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct CacheFaults {
    get: AtomicBool,
    set: AtomicBool,
    delete: AtomicBool,
}

#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicUsize,
    misses: AtomicUsize,
    sets: AtomicUsize,
    deletes: AtomicUsize,
}

/// In-memory [`CatalogCache`].
///
/// Expiry uses `tokio::time::Instant`, so tests with a paused clock can
/// advance past the TTL. Cloning shares the entry.
#[derive(Clone, Debug)]
pub struct InMemoryCatalogCache {
    entry: Arc<Mutex<Option<(Vec<Concert>, Instant)>>>,
    ttl: Duration,
    faults: Arc<CacheFaults>,
    stats: Arc<CacheStats>,
}

impl InMemoryCatalogCache {
    /// Create an empty cache with the given entry TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: Arc::new(Mutex::new(None)),
            ttl,
            faults: Arc::new(CacheFaults::default()),
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Make `get` fail until turned off.
    pub fn fail_gets(&self, fail: bool) {
        self.faults.get.store(fail, Ordering::SeqCst);
    }

    /// Make `set` fail until turned off.
    pub fn fail_sets(&self, fail: bool) {
        self.faults.set.store(fail, Ordering::SeqCst);
    }

    /// Make `delete` fail until turned off.
    pub fn fail_deletes(&self, fail: bool) {
        self.faults.delete.store(fail, Ordering::SeqCst);
    }

    /// Whether an unexpired entry is present.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|(_, expires)| *expires > Instant::now())
    }

    /// Put an entry directly, bypassing fault injection.
    pub fn prime(&self, concerts: Vec<Concert>) {
        *self.lock() = Some((concerts, Instant::now() + self.ttl));
    }

    /// Number of `get` calls that found an entry.
    #[must_use]
    pub fn hits(&self) -> usize {
        self.stats.hits.load(Ordering::SeqCst)
    }

    /// Number of `get` calls that found nothing.
    #[must_use]
    pub fn misses(&self) -> usize {
        self.stats.misses.load(Ordering::SeqCst)
    }

    /// Number of successful `set` calls.
    #[must_use]
    pub fn sets(&self) -> usize {
        self.stats.sets.load(Ordering::SeqCst)
    }

    /// Number of successful `delete` calls.
    #[must_use]
    pub fn deletes(&self) -> usize {
        self.stats.deletes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(Vec<Concert>, Instant)>> {
        self.entry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn injected(flag: &AtomicBool, op: &str) -> Result<(), CacheError> {
        if flag.load(Ordering::SeqCst) {
            Err(CacheError::Backend(format!("{op} failed")))
        } else {
            Ok(())
        }
    }
}

impl CatalogCache for InMemoryCatalogCache {
    fn get(&self) -> BoxFuture<'_, Result<Option<Vec<Concert>>, CacheError>> {
        Box::pin(async move {
            Self::injected(&self.faults.get, "GET")?;
            let mut entry = self.lock();
            let fresh = match entry.as_ref() {
                Some((concerts, expires)) if *expires > Instant::now() => Some(concerts.clone()),
                _ => None,
            };
            if fresh.is_some() {
                self.stats.hits.fetch_add(1, Ordering::SeqCst);
            } else {
                *entry = None;
                self.stats.misses.fetch_add(1, Ordering::SeqCst);
            }
            Ok(fresh)
        })
    }

    fn set<'a>(&'a self, concerts: &'a [Concert]) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            Self::injected(&self.faults.set, "SET")?;
            *self.lock() = Some((concerts.to_vec(), Instant::now() + self.ttl));
            self.stats.sets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn delete(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            Self::injected(&self.faults.delete, "DEL")?;
            *self.lock() = None;
            self.stats.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let cache = InMemoryCatalogCache::new(Duration::from_secs(300));
        cache.set(&[]).await.unwrap();
        assert_eq!(cache.get().await.unwrap(), Some(vec![]));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.get().await.unwrap(), None);
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[tokio::test]
    async fn injected_delete_failure_keeps_entry() {
        let cache = InMemoryCatalogCache::new(Duration::from_secs(300));
        cache.prime(vec![]);
        cache.fail_deletes(true);

        assert!(cache.delete().await.is_err());
        assert!(cache.is_populated());
    }
}
