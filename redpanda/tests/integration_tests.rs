//! Integration tests for the Redpanda publisher and notification log.
//!
//! These tests use testcontainers to spin up a real Kafka instance and validate:
//! - Publish/fetch round-trip of the JSON wire format
//! - Redelivery by seeking back to an unacknowledged offset
//! - Offset commits surviving a consumer restart
//! - `ack` returning only after the broker stored the offset
//! - The subscriber acknowledging only after its side effect succeeded
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds per test to spin up Kafka
//!
//! To run explicitly:
//! ```bash
//! cargo test -p concert-booking-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use concert_booking_core::notification::{
    BookingCreated, LogMessage, NotificationLog, NotificationPublisher,
};
use concert_booking_redpanda::{RedpandaNotificationLog, RedpandaPublisher};
use concert_booking_runtime::{NotificationSubscriber, RedeliveryPolicy};
use concert_booking_testing::ScriptedNotifier;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};
use tokio::sync::broadcast;

fn notification(booking: u32) -> BookingCreated {
    BookingCreated {
        booking_id: format!("booking-{booking}"),
        user_id: "user-1".to_string(),
        concert_id: "concert-1".to_string(),
        seat: booking,
        amount: 49.99,
    }
}

/// Start Kafka and wait until a publish to `topic` succeeds.
async fn start_kafka(topic: &str) -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");

    let warmup = publisher(&brokers, "warmup-topic");
    for attempt in 1..=60 {
        if warmup.publish(&notification(0)).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(attempt != 60, "Kafka failed to become ready");
    }

    // Create the topic and let its metadata propagate
    let setup = publisher(&brokers, topic);
    for attempt in 1..=30 {
        if setup.publish(&notification(0)).await.is_ok() {
            tokio::time::sleep(Duration::from_secs(3)).await;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(attempt != 30, "Failed to create topic {topic}");
    }

    (kafka, brokers)
}

fn publisher(brokers: &str, topic: &str) -> RedpandaPublisher {
    RedpandaPublisher::builder()
        .brokers(brokers)
        .topic(topic)
        .build()
        .expect("Failed to create publisher")
}

fn log(brokers: &str, topic: &str, group: &str) -> RedpandaNotificationLog {
    RedpandaNotificationLog::builder()
        .brokers(brokers)
        .topic(topic)
        .consumer_group(group)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create notification log")
}

/// Fetch until a message other than the setup message arrives.
async fn fetch_booking(log: &RedpandaNotificationLog) -> (LogMessage, BookingCreated) {
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let message = log.fetch().await.expect("fetch");
            let decoded = BookingCreated::decode(&message.payload).expect("decode");
            if decoded.booking_id == "booking-0" {
                log.ack(&message).await.expect("ack setup message");
                continue;
            }
            return (message, decoded);
        }
    })
    .await
    .expect("Timeout waiting for notification")
}

#[tokio::test]
#[ignore]
async fn test_publish_and_fetch_round_trip() {
    let (_kafka, brokers) = start_kafka("round-trip").await;
    let publisher = publisher(&brokers, "round-trip");
    let log = log(&brokers, "round-trip", "round-trip-group");

    publisher.publish(&notification(1)).await.expect("publish");

    let (message, decoded) = fetch_booking(&log).await;
    assert_eq!(decoded, notification(1));
    assert_eq!(message.key.as_deref(), Some("booking-1"));
    assert_eq!(message.topic, "round-trip");
    log.ack(&message).await.expect("ack");
}

#[tokio::test]
#[ignore]
async fn test_redeliver_returns_same_message() {
    let (_kafka, brokers) = start_kafka("redelivery").await;
    let publisher = publisher(&brokers, "redelivery");
    let log = log(&brokers, "redelivery", "redelivery-group");

    publisher.publish(&notification(1)).await.expect("publish 1");
    publisher.publish(&notification(2)).await.expect("publish 2");

    let (first, _) = fetch_booking(&log).await;
    log.redeliver(&first).await.expect("redeliver");

    let (again, decoded) = fetch_booking(&log).await;
    assert_eq!(again.offset, first.offset);
    assert_eq!(decoded.booking_id, "booking-1");
    log.ack(&again).await.expect("ack");

    let (next, decoded) = fetch_booking(&log).await;
    assert_eq!(next.offset, first.offset + 1);
    assert_eq!(decoded.booking_id, "booking-2");
}

#[tokio::test]
#[ignore]
async fn test_committed_offset_survives_restart() {
    let (_kafka, brokers) = start_kafka("restart").await;
    let publisher = publisher(&brokers, "restart");

    publisher.publish(&notification(1)).await.expect("publish 1");
    publisher.publish(&notification(2)).await.expect("publish 2");

    {
        let log = log(&brokers, "restart", "restart-group");
        let (first, _) = fetch_booking(&log).await;
        log.ack(&first).await.expect("ack");
    }

    let log = log(&brokers, "restart", "restart-group");
    let (_, decoded) = fetch_booking(&log).await;
    assert_eq!(decoded.booking_id, "booking-2");
}

#[tokio::test]
#[ignore]
async fn test_ack_returns_after_offset_is_committed() {
    let (_kafka, brokers) = start_kafka("durable-ack").await;
    let publisher = publisher(&brokers, "durable-ack");
    let log = log(&brokers, "durable-ack", "durable-ack-group");

    publisher.publish(&notification(1)).await.expect("publish");
    let (message, _) = fetch_booking(&log).await;
    log.ack(&message).await.expect("ack");

    // Another member of the group reads the committed offset straight away
    let observer: BaseConsumer = ClientConfig::new()
        .set("bootstrap.servers", &brokers)
        .set("group.id", "durable-ack-group")
        .set("enable.auto.commit", "false")
        .create()
        .expect("Failed to create observer");
    let mut partitions = TopicPartitionList::new();
    partitions.add_partition("durable-ack", message.partition);

    let committed = tokio::task::spawn_blocking(move || {
        observer.committed_offsets(partitions, Duration::from_secs(10))
    })
    .await
    .expect("observer task")
    .expect("committed offsets");

    let offset = committed
        .find_partition("durable-ack", message.partition)
        .expect("partition in committed list")
        .offset();
    assert_eq!(offset, Offset::Offset(message.offset + 1));
}

#[tokio::test]
#[ignore]
async fn test_subscriber_retries_until_side_effect_succeeds() {
    let (_kafka, brokers) = start_kafka("subscriber").await;
    let publisher = publisher(&brokers, "subscriber");
    let notifier = ScriptedNotifier::failing_times(2);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let subscriber = NotificationSubscriber::new(
        Arc::new(log(&brokers, "subscriber", "subscriber-group")),
        Arc::new(notifier.clone()),
        shutdown_rx,
    )
    .with_policy(RedeliveryPolicy::Unbounded)
    .spawn();

    publisher.publish(&notification(7)).await.expect("publish");

    tokio::time::timeout(Duration::from_secs(30), async {
        while !notifier
            .delivered()
            .iter()
            .any(|n| n.booking_id == "booking-7")
        {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("Timeout waiting for delivery");

    shutdown_tx.send(()).expect("shutdown");
    subscriber.await.expect("subscriber task");
    assert!(notifier.calls() >= 3);
}
