//! Read-through cache for the concert catalog.
//!
//! The cache holds exactly one entry, the list of all concerts, under
//! [`CATALOG_KEY`]. It is a derived, disposable view:
//!
//! - the read path fills it from the store on a miss
//! - the booking path only ever deletes it, never writes through
//! - it is never consulted when deciding whether a seat can be sold
//!
//! Staleness is bounded by the entry's TTL even if an invalidation is lost.

use crate::types::Concert;
use futures::future::BoxFuture;
use thiserror::Error;

/// Key of the single catalog entry.
pub const CATALOG_KEY: &str = "concerts:all";

/// Errors from the cache backend.
///
/// A missing entry is not an error; see [`CatalogCache::get`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The backend could not be reached or rejected the command.
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// The cached bytes could not be encoded or decoded.
    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

/// Cache of the full concert catalog.
pub trait CatalogCache: Send + Sync {
    /// Get the cached catalog.
    ///
    /// Returns `Ok(None)` on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] only for real backend failures.
    fn get(&self) -> BoxFuture<'_, Result<Option<Vec<Concert>>, CacheError>>;

    /// Store the catalog with the cache's TTL.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the entry cannot be written.
    fn set<'a>(&'a self, concerts: &'a [Concert]) -> BoxFuture<'a, Result<(), CacheError>>;

    /// Remove the catalog entry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the delete cannot be issued.
    fn delete(&self) -> BoxFuture<'_, Result<(), CacheError>>;
}
