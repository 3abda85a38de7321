//! Bounded publish queue drained by a fixed pool of workers.
//!
//! Booking notifications are published off the request path. The request
//! side calls [`PublishQueue::enqueue`], which never waits: when the queue is
//! full or shut down the notification is rejected and the caller logs it.
//! Workers take notifications one at a time and hand them to the
//! [`NotificationPublisher`]. A failed publish is logged and counted; it is
//! never retried and never affects the booking, which is already committed.
//!
//! ```text
//! create_booking ──try_send──► [ bounded mpsc ] ──► worker 0 ──┐
//!                                               ──► worker 1 ──┼──► publisher
//!                                               ──► worker N ──┘
//! ```
//!
//! # Shutdown
//!
//! [`PublishWorkers::shutdown`] closes the queue to new notifications, lets the
//! workers drain what is already queued, and waits for them up to a deadline.

use concert_booking_core::notification::{BookingCreated, NotificationPublisher, PublishError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::BookingMetrics;

/// Sizing of the publish queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishQueueConfig {
    /// Maximum queued notifications; further enqueues are rejected.
    pub capacity: usize,
    /// Number of concurrent publishing workers.
    pub workers: usize,
}

impl Default for PublishQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            workers: 4,
        }
    }
}

/// Sending side of the publish queue.
///
/// Cheap to clone; every clone feeds the same workers.
#[derive(Debug, Clone)]
pub struct PublishQueue {
    tx: mpsc::Sender<BookingCreated>,
    capacity: usize,
}

impl PublishQueue {
    /// Queue a notification for publishing without waiting.
    ///
    /// # Errors
    ///
    /// - [`PublishError::QueueFull`] if the queue is at capacity
    /// - [`PublishError::QueueClosed`] if the workers have shut down
    pub fn enqueue(&self, notification: BookingCreated) -> Result<(), PublishError> {
        self.tx.try_send(notification).map_err(|e| match e {
            TrySendError::Full(_) => PublishError::QueueFull {
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => PublishError::QueueClosed,
        })
    }

    /// Notifications currently waiting for a worker.
    #[must_use]
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Whether no notification is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handles of the publishing workers.
///
/// Dropping this without calling [`shutdown`](Self::shutdown) also closes the
/// queue; the workers then drain it in the background.
#[derive(Debug)]
pub struct PublishWorkers {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl PublishWorkers {
    /// Stop accepting notifications, drain the queue and wait for the workers.
    ///
    /// Workers still running at the deadline (e.g. stuck on a broker call) are
    /// aborted; whatever they held is lost.
    pub async fn shutdown(self, timeout: Duration) {
        info!(workers = self.handles.len(), "Draining publish queue");
        let _ = self.shutdown_tx.send(());

        let deadline = Instant::now() + timeout;
        for (idx, handle) in self.handles.into_iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let abort = handle.abort_handle();
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => debug!(worker = idx, "Publish worker stopped gracefully"),
                Ok(Err(e)) => warn!(worker = idx, error = %e, "Publish worker task failed"),
                Err(_) => {
                    warn!(worker = idx, "Publish worker shutdown timed out");
                    abort.abort();
                },
            }
        }
        info!("Publish queue drained");
    }
}

/// Create the publish queue and spawn its workers.
///
/// Must be called from within a Tokio runtime.
#[must_use]
pub fn spawn_publish_queue(
    publisher: Arc<dyn NotificationPublisher>,
    config: PublishQueueConfig,
) -> (PublishQueue, PublishWorkers) {
    let capacity = config.capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let rx = Arc::new(Mutex::new(rx));
    let (shutdown_tx, _) = broadcast::channel(1);

    let handles = (0..config.workers.max(1))
        .map(|id| {
            tokio::spawn(run_worker(
                id,
                Arc::clone(&rx),
                Arc::clone(&publisher),
                shutdown_tx.subscribe(),
            ))
        })
        .collect();

    info!(capacity, workers = config.workers.max(1), "Publish queue started");
    (
        PublishQueue { tx, capacity },
        PublishWorkers {
            handles,
            shutdown_tx,
        },
    )
}

async fn run_worker(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<BookingCreated>>>,
    publisher: Arc<dyn NotificationPublisher>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut draining = false;

    loop {
        let next = {
            let mut rx = rx.lock().await;
            if draining {
                rx.recv().await
            } else {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => {
                        // Closing keeps already queued notifications receivable.
                        rx.close();
                        draining = true;
                        continue;
                    }
                    next = rx.recv() => next,
                }
            }
        };

        let Some(notification) = next else {
            break;
        };
        publish_one(id, publisher.as_ref(), &notification).await;
    }

    debug!(worker = id, "Publish worker exiting");
}

async fn publish_one(worker: usize, publisher: &dyn NotificationPublisher, notification: &BookingCreated) {
    let start = Instant::now();
    match publisher.publish(notification).await {
        Ok(()) => {
            BookingMetrics::record_published(start.elapsed());
            debug!(
                worker,
                booking_id = %notification.booking_id,
                "Booking notification published"
            );
        },
        Err(e) => {
            BookingMetrics::record_publish_failed();
            warn!(
                worker,
                booking_id = %notification.booking_id,
                concert_id = %notification.concert_id,
                error = %e,
                "Failed to publish booking notification"
            );
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use concert_booking_testing::InMemoryNotificationLog;

    fn notification(seat: u32) -> BookingCreated {
        BookingCreated {
            booking_id: format!("booking-{seat}"),
            user_id: "user".to_string(),
            concert_id: "concert".to_string(),
            seat,
            amount: 49.99,
        }
    }

    async fn wait_for_len(log: &InMemoryNotificationLog, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while log.len() < expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("notifications published");
    }

    #[tokio::test]
    async fn workers_publish_queued_notifications() {
        let log = InMemoryNotificationLog::new("bookings.created");
        let (queue, workers) =
            spawn_publish_queue(Arc::new(log.clone()), PublishQueueConfig::default());

        for seat in 1..=3 {
            queue.enqueue(notification(seat)).unwrap();
        }
        wait_for_len(&log, 3).await;
        workers.shutdown(Duration::from_secs(1)).await;

        let mut seats: Vec<u32> = log.published().iter().map(|n| n.seat).collect();
        seats.sort_unstable();
        assert_eq!(seats, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn enqueue_rejects_when_full_without_waiting() {
        let log = InMemoryNotificationLog::new("bookings.created");
        log.pause_publishing();
        let (queue, workers) = spawn_publish_queue(
            Arc::new(log.clone()),
            PublishQueueConfig {
                capacity: 1,
                workers: 1,
            },
        );

        // The worker takes the first one and stalls on the broker.
        queue.enqueue(notification(1)).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while log.publish_attempts() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        queue.enqueue(notification(2)).unwrap();
        assert_eq!(
            queue.enqueue(notification(3)),
            Err(PublishError::QueueFull { capacity: 1 })
        );

        log.resume_publishing();
        wait_for_len(&log, 2).await;
        workers.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn shutdown_drains_queue_then_rejects() {
        let log = InMemoryNotificationLog::new("bookings.created");
        log.pause_publishing();
        let (queue, workers) = spawn_publish_queue(
            Arc::new(log.clone()),
            PublishQueueConfig {
                capacity: 8,
                workers: 2,
            },
        );
        for seat in 1..=5 {
            queue.enqueue(notification(seat)).unwrap();
        }

        let releaser = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            releaser.resume_publishing();
        });
        workers.shutdown(Duration::from_secs(5)).await;

        assert_eq!(log.len(), 5);
        assert_eq!(queue.enqueue(notification(6)), Err(PublishError::QueueClosed));
    }

    #[tokio::test]
    async fn failed_publish_is_not_retried() {
        let log = InMemoryNotificationLog::new("bookings.created");
        log.fail_publishes(true);
        let (queue, workers) =
            spawn_publish_queue(Arc::new(log.clone()), PublishQueueConfig::default());

        queue.enqueue(notification(1)).unwrap();
        workers.shutdown(Duration::from_secs(1)).await;

        assert_eq!(log.publish_attempts(), 1);
        assert!(log.is_empty());
    }
}
