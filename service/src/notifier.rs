//! The notification side effect run by the consumer process.

use concert_booking_core::notification::{BookingCreated, NotificationHandler, SideEffectError};
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::info;

/// Simulated user notification: waits as long as a mail provider call would,
/// then logs the notification.
#[derive(Debug, Clone)]
pub struct LoggingNotifier {
    latency: Duration,
}

impl LoggingNotifier {
    /// Notifier with the given simulated delivery latency.
    #[must_use]
    pub const fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for LoggingNotifier {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

impl NotificationHandler for LoggingNotifier {
    fn handle<'a>(
        &'a self,
        notification: &'a BookingCreated,
    ) -> BoxFuture<'a, Result<(), SideEffectError>> {
        Box::pin(async move {
            tokio::time::sleep(self.latency).await;
            info!(
                user_id = %notification.user_id,
                booking_id = %notification.booking_id,
                concert_id = %notification.concert_id,
                seat = notification.seat,
                amount = notification.amount,
                "Notify user={} booking={}",
                notification.user_id,
                notification.booking_id
            );
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn notification() -> BookingCreated {
        BookingCreated {
            booking_id: "booking-1".to_string(),
            user_id: "user-1".to_string(),
            concert_id: "concert-1".to_string(),
            seat: 12,
            amount: 49.99,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_simulated_latency() {
        let notifier = LoggingNotifier::default();
        let start = tokio::time::Instant::now();

        notifier.handle(&notification()).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn zero_latency_succeeds_immediately() {
        let notifier = LoggingNotifier::new(Duration::ZERO);
        assert!(notifier.handle(&notification()).await.is_ok());
    }
}
