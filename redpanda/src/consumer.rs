//! Consumer side: the notification log as seen by one consumer group member.

use concert_booking_core::notification::{LogError, LogMessage, NotificationLog};
use futures::future::BoxFuture;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;

use crate::{DEFAULT_TOPIC, RedpandaError};

const DEFAULT_CONSUMER_GROUP: &str = "notification-service";
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// [`NotificationLog`] over a Kafka consumer group with manual commits.
///
/// `ack` commits `offset + 1` for the message's partition and returns only
/// once the broker has accepted the commit. `redeliver` seeks
/// the partition back to the message's offset so the next `fetch` returns it
/// again.
pub struct RedpandaNotificationLog {
    consumer: Arc<StreamConsumer>,
    topic: String,
    consumer_group: String,
}

impl RedpandaNotificationLog {
    /// Create a new builder for configuring the consumer.
    #[must_use]
    pub fn builder() -> RedpandaNotificationLogBuilder {
        RedpandaNotificationLogBuilder::default()
    }

    /// The subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The consumer group id.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }
}

impl std::fmt::Debug for RedpandaNotificationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaNotificationLog")
            .field("topic", &self.topic)
            .field("consumer_group", &self.consumer_group)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RedpandaNotificationLog`].
#[derive(Default)]
pub struct RedpandaNotificationLogBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
}

impl RedpandaNotificationLogBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the topic to consume.
    ///
    /// Default: `bookings.created`
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the consumer group ID.
    ///
    /// Instances sharing a group split the topic's partitions between them.
    ///
    /// Default: `notification-service`
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set where a group with no committed offset starts reading:
    /// `"earliest"`, `"latest"` or `"error"`.
    ///
    /// Default: `"earliest"`
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Create the consumer and subscribe to the topic.
    ///
    /// # Errors
    ///
    /// - [`RedpandaError::Configuration`] if brokers are not set
    /// - [`RedpandaError::ConnectionFailed`] if the consumer cannot be created
    ///   or subscribed
    pub fn build(self) -> Result<RedpandaNotificationLog, RedpandaError> {
        let brokers = self
            .brokers
            .ok_or_else(|| RedpandaError::Configuration("Brokers not configured".to_string()))?;
        let topic = self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string());
        let consumer_group = self
            .consumer_group
            .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string());
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("group.id", &consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| {
                RedpandaError::ConnectionFailed(format!("Failed to create consumer: {e}"))
            })?;

        consumer.subscribe(&[topic.as_str()]).map_err(|e| {
            RedpandaError::ConnectionFailed(format!("Failed to subscribe to {topic}: {e}"))
        })?;

        tracing::info!(
            topic = %topic,
            consumer_group = %consumer_group,
            auto_offset_reset = %auto_offset_reset,
            manual_commit = true,
            "Subscribed to notification log"
        );

        Ok(RedpandaNotificationLog {
            consumer: Arc::new(consumer),
            topic,
            consumer_group,
        })
    }
}

fn to_log_message<M: Message>(message: &M) -> LogMessage {
    LogMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned()),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

impl NotificationLog for RedpandaNotificationLog {
    fn fetch(&self) -> BoxFuture<'_, Result<LogMessage, LogError>> {
        Box::pin(async move {
            let message = self
                .consumer
                .recv()
                .await
                .map_err(|e| LogError::Fetch(e.to_string()))?;

            tracing::trace!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                "Received notification"
            );
            Ok(to_log_message(&message))
        })
    }

    fn ack<'a>(&'a self, message: &'a LogMessage) -> BoxFuture<'a, Result<(), LogError>> {
        Box::pin(async move {
            let commit_error = |reason: String| LogError::Commit {
                partition: message.partition,
                offset: message.offset,
                reason,
            };

            let mut offsets = TopicPartitionList::new();
            offsets
                .add_partition_offset(
                    &message.topic,
                    message.partition,
                    Offset::Offset(message.offset + 1),
                )
                .map_err(|e| commit_error(e.to_string()))?;

            // Sync commit blocks until the broker answers
            let consumer = Arc::clone(&self.consumer);
            let result =
                tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
                    .await;

            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(commit_error(e.to_string())),
                Err(e) => Err(commit_error(e.to_string())),
            }
        })
    }

    fn redeliver<'a>(&'a self, message: &'a LogMessage) -> BoxFuture<'a, Result<(), LogError>> {
        Box::pin(async move {
            let consumer = Arc::clone(&self.consumer);
            let topic = message.topic.clone();
            let partition = message.partition;
            let offset = message.offset;

            // seek blocks on the broker round trip
            let result = tokio::task::spawn_blocking(move || {
                consumer.seek(
                    &topic,
                    partition,
                    Offset::Offset(offset),
                    Timeout::After(SEEK_TIMEOUT),
                )
            })
            .await;

            let seek_error = |reason: String| LogError::Seek {
                partition,
                offset,
                reason,
            };
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(seek_error(e.to_string())),
                Err(e) => Err(seek_error(e.to_string())),
            }
        })
    }
}
