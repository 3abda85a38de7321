//! Producer side: append booking notifications to the log.

use concert_booking_core::notification::{BookingCreated, NotificationPublisher, PublishError};
use futures::future::BoxFuture;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

use crate::{DEFAULT_TOPIC, RedpandaError};

/// Publishes [`BookingCreated`] notifications as JSON, keyed by booking id.
///
/// # Example
///
/// ```no_run
/// use concert_booking_redpanda::RedpandaPublisher;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let publisher = RedpandaPublisher::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")  // Wait for all replicas
///     .compression("lz4")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaPublisher {
    /// Kafka producer
    producer: FutureProducer,
    /// Target topic
    topic: String,
    /// Producer send timeout
    timeout: Duration,
}

impl RedpandaPublisher {
    /// Create a new builder for configuring the publisher.
    #[must_use]
    pub fn builder() -> RedpandaPublisherBuilder {
        RedpandaPublisherBuilder::default()
    }

    /// The topic notifications are published to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl std::fmt::Debug for RedpandaPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaPublisher")
            .field("topic", &self.topic)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RedpandaPublisher`].
#[derive(Default)]
pub struct RedpandaPublisherBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaPublisherBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the target topic.
    ///
    /// Default: `bookings.created`
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the producer acknowledgment mode.
    ///
    /// - `acks`: "0" (no acks), "1" (leader ack), "all" (all replicas ack)
    ///
    /// Default: "1"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaPublisher`].
    ///
    /// # Errors
    ///
    /// - [`RedpandaError::Configuration`] if brokers are not set
    /// - [`RedpandaError::ConnectionFailed`] if the producer cannot be created
    pub fn build(self) -> Result<RedpandaPublisher, RedpandaError> {
        let brokers = self
            .brokers
            .ok_or_else(|| RedpandaError::Configuration("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("1");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                RedpandaError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let topic = self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string());
        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            acks,
            compression,
            "RedpandaPublisher created successfully"
        );

        Ok(RedpandaPublisher {
            producer,
            topic,
            timeout,
        })
    }
}

impl NotificationPublisher for RedpandaPublisher {
    fn publish<'a>(
        &'a self,
        notification: &'a BookingCreated,
    ) -> BoxFuture<'a, Result<(), PublishError>> {
        Box::pin(async move {
            let payload = notification.encode()?;
            let record = FutureRecord::to(&self.topic)
                .payload(&payload)
                .key(notification.key());

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        partition,
                        offset,
                        booking_id = %notification.booking_id,
                        "Notification published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => Err(PublishError::Transport {
                    topic: self.topic.clone(),
                    reason: kafka_error.to_string(),
                }),
            }
        })
    }
}
