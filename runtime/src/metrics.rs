//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the booking path:
//! - Booking outcomes and latency
//! - Notification publishing
//! - Catalog cache effectiveness
//! - Subscriber acknowledgements, redeliveries and dead letters
//!
//! # Example
//!
//! ```rust,no_run
//! use concert_booking_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder and start serving `/metrics` on a background task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs a
    /// warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            // Configure histogram buckets for latency measurements
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                tokio::spawn(async move {
                    if let Err(e) = exporter.await {
                        tracing::error!(error = ?e, "Metrics exporter stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Booking Metrics
    describe_counter!(
        "bookings_created_total",
        "Total number of confirmed bookings"
    );
    describe_counter!(
        "bookings_rejected_total",
        "Total number of booking requests rejected, by reason"
    );
    describe_histogram!(
        "booking_create_duration_seconds",
        "Time taken to confirm a booking, including commit"
    );

    // Publishing Metrics
    describe_counter!(
        "booking_notifications_published_total",
        "Total number of booking notifications appended to the log"
    );
    describe_counter!(
        "booking_publish_failed_total",
        "Total number of booking notifications that were not published"
    );
    describe_histogram!(
        "booking_publish_duration_seconds",
        "Time taken to publish a booking notification"
    );

    // Catalog Metrics
    describe_counter!(
        "catalog_cache_hits_total",
        "Total number of catalog reads served from the cache"
    );
    describe_counter!(
        "catalog_cache_misses_total",
        "Total number of catalog reads that went to the store"
    );
    describe_counter!(
        "catalog_cache_errors_total",
        "Total number of failed cache operations, by operation"
    );

    // Subscriber Metrics
    describe_counter!(
        "notifications_acknowledged_total",
        "Total number of notifications processed and acknowledged"
    );
    describe_counter!(
        "notifications_redelivered_total",
        "Total number of notifications left unacknowledged for redelivery"
    );
    describe_counter!(
        "notifications_dead_lettered_total",
        "Total number of notifications moved to the dead letter table"
    );
}

/// Booking metrics recorder.
pub struct BookingMetrics;

impl BookingMetrics {
    /// Record a confirmed booking.
    pub fn record_created(duration: Duration) {
        counter!("bookings_created_total").increment(1);
        histogram!("booking_create_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a rejected booking.
    pub fn record_rejected(reason: &'static str) {
        counter!("bookings_rejected_total", "reason" => reason).increment(1);
    }

    /// Record a published notification.
    pub fn record_published(duration: Duration) {
        counter!("booking_notifications_published_total").increment(1);
        histogram!("booking_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a notification that was dropped or failed to publish.
    pub fn record_publish_failed() {
        counter!("booking_publish_failed_total").increment(1);
    }
}

/// Catalog cache metrics recorder.
pub struct CatalogMetrics;

impl CatalogMetrics {
    /// Record a cache hit.
    pub fn record_hit() {
        counter!("catalog_cache_hits_total").increment(1);
    }

    /// Record a cache miss.
    pub fn record_miss() {
        counter!("catalog_cache_misses_total").increment(1);
    }

    /// Record a failed cache operation (`get`, `set` or `delete`).
    pub fn record_error(operation: &'static str) {
        counter!("catalog_cache_errors_total", "operation" => operation).increment(1);
    }
}

/// Subscriber metrics recorder.
pub struct SubscriberMetrics;

impl SubscriberMetrics {
    /// Record an acknowledged notification.
    pub fn record_acknowledged() {
        counter!("notifications_acknowledged_total").increment(1);
    }

    /// Record a notification left for redelivery.
    pub fn record_redelivered() {
        counter!("notifications_redelivered_total").increment(1);
    }

    /// Record a dead-lettered notification.
    pub fn record_dead_lettered() {
        counter!("notifications_dead_lettered_total").increment(1);
    }
}
