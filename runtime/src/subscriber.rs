//! At-least-once notification subscriber.
//!
//! A single sequential loop over the durable log:
//!
//! ```text
//! loop {
//!     fetch            (waits for a message or shutdown)
//!     decode + handle  (never interrupted by shutdown)
//!     ok   → ack       (offset advances)
//!     err  → redeliver (offset stays; the same message comes back next)
//! }
//! ```
//!
//! # Redelivery Policy
//!
//! - [`RedeliveryPolicy::Unbounded`] (default): a failing message is
//!   redelivered immediately, forever. One poison message stalls its
//!   partition.
//! - [`RedeliveryPolicy::Bounded`]: redeliveries are spaced by exponential
//!   backoff; after `max_attempts` failures the message is written to a
//!   [`DeadLetterSink`] and acknowledged.
//!
//! A payload that cannot be decoded is a processing failure like any other.
//!
//! # Shutdown
//!
//! Shutdown is checked while waiting for a fetch, during backoff waits and
//! between iterations. A side effect in progress always runs to completion
//! and is acknowledged before the loop exits.

use concert_booking_core::notification::{
    BookingCreated, DeadLetterSink, LogMessage, NotificationHandler, NotificationLog,
    SideEffectError,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics::SubscriberMetrics;
use crate::retry::RetryPolicy;

/// What happens to a message whose processing failed.
#[derive(Clone, Default)]
pub enum RedeliveryPolicy {
    /// Redeliver immediately, without limit.
    #[default]
    Unbounded,
    /// Back off between attempts and dead-letter after `max_attempts`.
    Bounded {
        /// Failed attempts before the message is dead-lettered (at least 1)
        max_attempts: u32,
        /// Delay before each redelivery
        backoff: RetryPolicy,
        /// Where exhausted messages go
        dead_letters: Arc<dyn DeadLetterSink>,
    },
}

impl std::fmt::Debug for RedeliveryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbounded => f.write_str("Unbounded"),
            Self::Bounded {
                max_attempts,
                backoff,
                ..
            } => f
                .debug_struct("Bounded")
                .field("max_attempts", max_attempts)
                .field("backoff", backoff)
                .finish_non_exhaustive(),
        }
    }
}

enum FailureAction {
    Redeliver { delay: Option<Duration> },
    DeadLetter { sink: Arc<dyn DeadLetterSink>, retry_delay: Duration },
}

/// Notification subscriber loop.
pub struct NotificationSubscriber {
    name: String,
    log: Arc<dyn NotificationLog>,
    handler: Arc<dyn NotificationHandler>,
    policy: RedeliveryPolicy,
    shutdown: broadcast::Receiver<()>,
    fetch_retry_delay: Duration,
    // Failed attempts per (partition, offset) of messages not yet acknowledged.
    attempts: HashMap<(i32, i64), u32>,
    stopping: bool,
}

impl NotificationSubscriber {
    /// Create a subscriber with the unbounded redelivery policy and a 1 second
    /// delay after fetch errors.
    #[must_use]
    pub fn new(
        log: Arc<dyn NotificationLog>,
        handler: Arc<dyn NotificationHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: "notification-service".to_string(),
            log,
            handler,
            policy: RedeliveryPolicy::Unbounded,
            shutdown,
            fetch_retry_delay: Duration::from_secs(1),
            attempts: HashMap::new(),
            stopping: false,
        }
    }

    /// Set the name used in logs.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the redelivery policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RedeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the delay after a failed fetch.
    #[must_use]
    pub const fn with_fetch_retry_delay(mut self, delay: Duration) -> Self {
        self.fetch_retry_delay = delay;
        self
    }

    /// Spawn the subscriber as a background task.
    ///
    /// The task runs until the shutdown channel fires or is closed.
    #[must_use]
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the loop on the current task until shutdown.
    pub async fn run(&mut self) {
        info!(subscriber = %self.name, policy = ?self.policy, "Notification subscriber started");

        while !self.stopping {
            let fetched = tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    info!(subscriber = %self.name, "Notification subscriber received shutdown signal");
                    break;
                }
                fetched = self.log.fetch() => fetched,
            };

            match fetched {
                Ok(message) => self.process(message).await,
                Err(e) => {
                    error!(
                        subscriber = %self.name,
                        error = %e,
                        "Failed to fetch notification, retrying in {:?}",
                        self.fetch_retry_delay
                    );
                    self.wait(self.fetch_retry_delay).await;
                },
            }
        }

        info!(subscriber = %self.name, "Notification subscriber stopped");
    }

    async fn process(&mut self, message: LogMessage) {
        let outcome = match BookingCreated::decode(&message.payload) {
            Ok(notification) => {
                debug!(
                    subscriber = %self.name,
                    booking_id = %notification.booking_id,
                    partition = message.partition,
                    offset = message.offset,
                    "Processing notification"
                );
                self.handler.handle(&notification).await
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.attempts.remove(&(message.partition, message.offset));
                self.acknowledge(&message).await;
            },
            Err(e) => self.handle_failure(&message, &e).await,
        }
    }

    async fn handle_failure(&mut self, message: &LogMessage, failure: &SideEffectError) {
        let key = (message.partition, message.offset);
        let attempts = {
            let count = self.attempts.entry(key).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };

        warn!(
            subscriber = %self.name,
            partition = message.partition,
            offset = message.offset,
            attempts,
            error = %failure,
            "Notification processing failed"
        );

        match self.failure_action(attempts) {
            FailureAction::Redeliver { delay } => {
                match delay {
                    Some(delay) => self.wait(delay).await,
                    // Immediate redelivery must still let other tasks run.
                    None => tokio::task::yield_now().await,
                }
                self.redeliver(message).await;
            },
            FailureAction::DeadLetter { sink, retry_delay } => {
                match sink.bury(message, &failure.to_string(), attempts).await {
                    Ok(id) => {
                        SubscriberMetrics::record_dead_lettered();
                        error!(
                            subscriber = %self.name,
                            partition = message.partition,
                            offset = message.offset,
                            attempts,
                            dead_letter_id = id,
                            "Notification moved to dead letter table"
                        );
                        self.attempts.remove(&key);
                        self.acknowledge(message).await;
                    },
                    Err(e) => {
                        error!(
                            subscriber = %self.name,
                            partition = message.partition,
                            offset = message.offset,
                            error = %e,
                            "Failed to dead-letter notification, keeping it for redelivery"
                        );
                        self.wait(retry_delay).await;
                        self.redeliver(message).await;
                    },
                }
            },
        }
    }

    fn failure_action(&self, attempts: u32) -> FailureAction {
        match &self.policy {
            RedeliveryPolicy::Unbounded => FailureAction::Redeliver { delay: None },
            RedeliveryPolicy::Bounded {
                max_attempts,
                backoff,
                dead_letters,
            } => {
                let retry = usize::try_from(attempts.saturating_sub(1)).unwrap_or(usize::MAX);
                let delay = backoff.delay_for_attempt(retry);
                if attempts >= (*max_attempts).max(1) {
                    FailureAction::DeadLetter {
                        sink: Arc::clone(dead_letters),
                        retry_delay: delay,
                    }
                } else {
                    FailureAction::Redeliver { delay: Some(delay) }
                }
            },
        }
    }

    async fn acknowledge(&self, message: &LogMessage) {
        match self.log.ack(message).await {
            Ok(()) => {
                SubscriberMetrics::record_acknowledged();
                debug!(
                    subscriber = %self.name,
                    partition = message.partition,
                    offset = message.offset,
                    "Notification acknowledged"
                );
            },
            Err(e) => warn!(
                subscriber = %self.name,
                error = %e,
                "Failed to acknowledge notification, it may be delivered again"
            ),
        }
    }

    async fn redeliver(&self, message: &LogMessage) {
        SubscriberMetrics::record_redelivered();
        if let Err(e) = self.log.redeliver(message).await {
            error!(
                subscriber = %self.name,
                error = %e,
                "Failed to rewind to unacknowledged notification"
            );
        }
    }

    /// Sleep for `delay` unless shutdown arrives first.
    async fn wait(&mut self, delay: Duration) {
        tokio::select! {
            _ = self.shutdown.recv() => {
                info!(subscriber = %self.name, "Notification subscriber received shutdown signal while waiting");
                self.stopping = true;
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}
