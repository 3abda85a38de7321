//! Concert catalog reads and concert creation.
//!
//! The listing is read-through: a cache hit is served as is, a miss (or any
//! cache error) falls back to the store and then refills the cache on a best
//! effort basis. Creating a concert invalidates the listing.

use concert_booking_core::cache::CatalogCache;
use concert_booking_core::store::{InventoryStore, StoreError};
use concert_booking_core::{Concert, ConcertId, NewConcert};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::metrics::CatalogMetrics;

/// Catalog read path over the inventory store and the catalog cache.
pub struct CatalogService<I: InventoryStore + ?Sized> {
    inventory: Arc<I>,
    cache: Arc<dyn CatalogCache>,
}

impl<I: InventoryStore + ?Sized> Clone for CatalogService<I> {
    fn clone(&self) -> Self {
        Self {
            inventory: Arc::clone(&self.inventory),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<I: InventoryStore + ?Sized> CatalogService<I> {
    /// Create a catalog service.
    #[must_use]
    pub fn new(inventory: Arc<I>, cache: Arc<dyn CatalogCache>) -> Self {
        Self { inventory, cache }
    }

    /// All concerts, from the cache when possible.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the cache misses and the store
    /// query fails. Cache failures alone never fail the read.
    pub async fn list_concerts(&self) -> Result<Vec<Concert>, StoreError> {
        match self.cache.get().await {
            Ok(Some(concerts)) => {
                CatalogMetrics::record_hit();
                debug!(count = concerts.len(), "Catalog served from cache");
                return Ok(concerts);
            },
            Ok(None) => CatalogMetrics::record_miss(),
            Err(e) => {
                CatalogMetrics::record_error("get");
                warn!(error = %e, "Catalog cache read failed, falling back to store");
            },
        }

        let concerts = self.inventory.list_concerts(None).await?;

        if let Err(e) = self.cache.set(&concerts).await {
            CatalogMetrics::record_error("set");
            warn!(error = %e, "Failed to refill catalog cache");
        }
        Ok(concerts)
    }

    /// One concert, straight from the store.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the concert does not exist
    /// - [`StoreError::Unavailable`] if the query fails
    pub async fn get_concert(&self, concert_id: ConcertId) -> Result<Concert, StoreError> {
        self.inventory.get_concert(None, concert_id).await
    }

    /// Create a concert and invalidate the cached listing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the insert fails.
    pub async fn create_concert(&self, concert: NewConcert) -> Result<Concert, StoreError> {
        let created = self.inventory.create_concert(None, concert).await?;
        info!(
            concert_id = %created.id,
            total_seats = created.total_seats,
            "Concert created"
        );

        if let Err(e) = self.cache.delete().await {
            CatalogMetrics::record_error("delete");
            warn!(error = %e, "Failed to invalidate catalog cache after concert creation");
        }
        Ok(created)
    }
}
