//! Booking notifications and the durable log that carries them.
//!
//! # Flow
//!
//! ```text
//! ┌──────────────────┐
//! │  CreateBooking   │
//! │   (committed)    │◄─── Source of truth
//! └────────┬─────────┘
//!          │ enqueue (never blocks)
//!          ▼
//! ┌──────────────────┐
//! │  Publish queue   │
//! └────────┬─────────┘
//!          │ NotificationPublisher::publish
//!          ▼
//! ┌──────────────────┐
//! │  Durable log     │◄─── keyed by booking id
//! └────────┬─────────┘
//!          │ NotificationLog::fetch
//!          ▼
//! ┌──────────────────┐
//! │   Subscriber     │──── NotificationHandler, then ack
//! └──────────────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once.** A publish may be uncertain after a transport failure, and
//! the subscriber acknowledges only after its side effect succeeded, so a
//! handler may see the same notification more than once. Handlers are not
//! guaranteed to be idempotent.
//!
//! # Wire Format
//!
//! JSON with fixed fields:
//!
//! ```json
//! {"booking_id":"…","user_id":"…","concert_id":"…","seat":5,"amount":49.99}
//! ```

use crate::store::StoreError;
use crate::types::{Booking, Money};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Notification emitted once per confirmed booking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookingCreated {
    /// Booking identity
    pub booking_id: String,
    /// Who booked
    pub user_id: String,
    /// Which concert
    pub concert_id: String,
    /// Seat number
    pub seat: u32,
    /// Amount charged, in currency units
    pub amount: f64,
}

impl BookingCreated {
    /// Build the notification for a confirmed booking sold at `price`.
    #[must_use]
    pub fn from_booking(booking: &Booking, price: Money) -> Self {
        Self {
            booking_id: booking.id.to_string(),
            user_id: booking.user_id.to_string(),
            concert_id: booking.concert_id.to_string(),
            seat: booking.seat_number.get(),
            amount: price.as_decimal(),
        }
    }

    /// Partition key: all messages for one booking land in one partition.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.booking_id
    }

    /// Encode to the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Serialization`] if encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>, PublishError> {
        serde_json::to_vec(self).map_err(|e| PublishError::Serialization(e.to_string()))
    }

    /// Decode from the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`SideEffectError::Malformed`] if the payload is not a valid
    /// notification.
    pub fn decode(payload: &[u8]) -> Result<Self, SideEffectError> {
        serde_json::from_slice(payload).map_err(|e| SideEffectError::Malformed(e.to_string()))
    }
}

// ============================================================================
// Publishing
// ============================================================================

/// Errors on the publishing side.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The notification could not be encoded.
    #[error("Failed to serialize notification: {0}")]
    Serialization(String),

    /// The log did not confirm the append.
    ///
    /// The message may or may not have been written.
    #[error("Publish failed for topic '{topic}': {reason}")]
    Transport {
        /// Target topic
        topic: String,
        /// Broker or client error
        reason: String,
    },

    /// The publish queue is at capacity; the notification was dropped.
    #[error("Publish queue is full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// The publish queue has been shut down.
    #[error("Publish queue is closed")]
    QueueClosed,
}

/// Appends booking notifications to the durable log.
pub trait NotificationPublisher: Send + Sync {
    /// Append one notification, keyed by booking id.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] if the append is not confirmed.
    fn publish<'a>(
        &'a self,
        notification: &'a BookingCreated,
    ) -> BoxFuture<'a, Result<(), PublishError>>;
}

// ============================================================================
// Consuming
// ============================================================================

/// A message fetched from the log, not yet acknowledged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogMessage {
    /// Topic the message came from
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Message key (booking id)
    pub key: Option<String>,
    /// Raw payload
    pub payload: Vec<u8>,
}

/// Errors from the consuming side of the log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// Fetching the next message failed.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Committing the consumer offset failed.
    #[error("Commit failed at {partition}/{offset}: {reason}")]
    Commit {
        /// Partition
        partition: i32,
        /// Offset of the message being acknowledged
        offset: i64,
        /// Client error
        reason: String,
    },

    /// Rewinding to an unacknowledged message failed.
    #[error("Seek failed at {partition}/{offset}: {reason}")]
    Seek {
        /// Partition
        partition: i32,
        /// Offset to rewind to
        offset: i64,
        /// Client error
        reason: String,
    },
}

/// Consumer-group view of the durable log.
///
/// Offsets only advance through [`ack`](Self::ack). After
/// [`redeliver`](Self::redeliver) the next [`fetch`](Self::fetch) returns the
/// same message again.
pub trait NotificationLog: Send + Sync {
    /// Wait for the next message.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Fetch`] on transport failure.
    fn fetch(&self) -> BoxFuture<'_, Result<LogMessage, LogError>>;

    /// Acknowledge a message, advancing the durable consumer offset past it.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Commit`] if the offset cannot be committed; the
    /// message may then be delivered again.
    fn ack<'a>(&'a self, message: &'a LogMessage) -> BoxFuture<'a, Result<(), LogError>>;

    /// Leave a message unacknowledged and rewind so it is fetched again.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Seek`] if the position cannot be reset.
    fn redeliver<'a>(&'a self, message: &'a LogMessage) -> BoxFuture<'a, Result<(), LogError>>;
}

/// Errors from the subscriber's side effect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SideEffectError {
    /// The payload is not a valid notification.
    #[error("Malformed notification: {0}")]
    Malformed(String),

    /// The side effect itself failed.
    #[error("Side effect failed: {0}")]
    Failed(String),
}

/// The subscriber's side effect, e.g. notifying the user.
///
/// Runs to completion with no deadline.
pub trait NotificationHandler: Send + Sync {
    /// Handle one notification.
    ///
    /// # Errors
    ///
    /// Returns [`SideEffectError::Failed`] if the effect did not happen; the
    /// message is then redelivered.
    fn handle<'a>(
        &'a self,
        notification: &'a BookingCreated,
    ) -> BoxFuture<'a, Result<(), SideEffectError>>;
}

/// Parking lot for messages that exhausted their redelivery budget.
pub trait DeadLetterSink: Send + Sync {
    /// Record a message that will not be retried any more.
    ///
    /// Returns an identifier for the dead letter entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the entry cannot be written; the
    /// message must then stay unacknowledged.
    fn bury<'a>(
        &'a self,
        message: &'a LogMessage,
        error: &'a str,
        attempts: u32,
    ) -> BoxFuture<'a, Result<i64, StoreError>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{BookingId, BookingStatus, ConcertId, SeatNumber, UserId};
    use chrono::Utc;

    fn booking() -> Booking {
        Booking {
            id: BookingId::new(),
            user_id: UserId::new(),
            concert_id: ConcertId::new(),
            seat_number: SeatNumber::new(5).expect("non-zero"),
            status: BookingStatus::Confirmed,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn wire_format_has_fixed_field_names() {
        let booking = booking();
        let notification = BookingCreated::from_booking(&booking, Money::from_cents(4_950));
        let json: serde_json::Value =
            serde_json::from_slice(&notification.encode().unwrap()).unwrap();

        assert_eq!(json["booking_id"], booking.id.to_string());
        assert_eq!(json["user_id"], booking.user_id.to_string());
        assert_eq!(json["concert_id"], booking.concert_id.to_string());
        assert_eq!(json["seat"], 5);
        assert_eq!(json["amount"], 49.5);
        assert_eq!(notification.key(), booking.id.to_string());
    }

    #[test]
    fn decodes_notification_with_zero_amount() {
        let payload = br#"{"booking_id":"b","user_id":"u","concert_id":"c","seat":3,"amount":0}"#;
        let decoded = BookingCreated::decode(payload).unwrap();
        assert_eq!(decoded.seat, 3);
        assert!(decoded.amount.abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_payload_with_missing_fields() {
        let err = BookingCreated::decode(br#"{"booking_id":"b"}"#).unwrap_err();
        assert!(matches!(err, SideEffectError::Malformed(_)));
    }
}
