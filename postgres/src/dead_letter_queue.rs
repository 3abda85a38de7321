//! Dead Letter Queue (DLQ) for booking notifications.
//!
//! Holds notifications whose side effect kept failing after the subscriber's
//! redelivery budget ran out. Entries are written before the message is
//! acknowledged, so nothing is lost between the log and this table. Operators
//! inspect them and then resolve or discard them.

use chrono::{DateTime, Utc};
use concert_booking_core::notification::{DeadLetterSink, LogMessage};
use concert_booking_core::store::StoreError;
use futures::future::BoxFuture;
use sqlx::PgPool;

use crate::error::unavailable;

/// Status of a failed notification in the Dead Letter Queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DLQStatus {
    /// Awaiting investigation
    Pending,
    /// Reprocessed successfully
    Resolved,
    /// Permanently given up
    Discarded,
}

impl DLQStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the string is not a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(StoreError::Unavailable(format!("Invalid DLQ status: {s}"))),
        }
    }
}

/// An entry in the Dead Letter Queue.
#[derive(Debug, Clone)]
pub struct FailedNotification {
    /// Unique identifier for this DLQ entry
    pub id: i64,
    /// Topic the message was read from
    pub topic: String,
    /// Partition the message was read from
    pub partition: i32,
    /// Offset of the message within its partition
    pub offset: i64,
    /// Message key (the booking id)
    pub key: Option<String>,
    /// Raw payload, kept as received so malformed messages can be inspected
    pub payload: Vec<u8>,
    /// Last error reported by the side effect
    pub error_message: String,
    /// Deliveries attempted before giving up
    pub attempts: i32,
    /// When the entry was written
    pub failed_at: DateTime<Utc>,
    /// Current processing status
    pub status: DLQStatus,
    /// When the entry was resolved or discarded
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved it
    pub resolved_by: Option<String>,
    /// Notes about the resolution
    pub resolution_notes: Option<String>,
}

#[derive(sqlx::FromRow)]
struct FailedNotificationRow {
    id: i64,
    topic: String,
    log_partition: i32,
    log_offset: i64,
    message_key: Option<String>,
    payload: Vec<u8>,
    error_message: String,
    attempts: i32,
    failed_at: DateTime<Utc>,
    status: String,
    resolved_at: Option<DateTime<Utc>>,
    resolved_by: Option<String>,
    resolution_notes: Option<String>,
}

impl FailedNotificationRow {
    fn into_entry(self) -> Result<FailedNotification, StoreError> {
        Ok(FailedNotification {
            id: self.id,
            topic: self.topic,
            partition: self.log_partition,
            offset: self.log_offset,
            key: self.message_key,
            payload: self.payload,
            error_message: self.error_message,
            attempts: self.attempts,
            failed_at: self.failed_at,
            status: DLQStatus::parse(&self.status)?,
            resolved_at: self.resolved_at,
            resolved_by: self.resolved_by,
            resolution_notes: self.resolution_notes,
        })
    }
}

const ENTRY_COLUMNS: &str = "id, topic, log_partition, log_offset, message_key, payload, \
     error_message, attempts, failed_at, status, resolved_at, resolved_by, resolution_notes";

/// `PostgreSQL`-based Dead Letter Queue over the `failed_notifications` table.
///
/// # Example
///
/// ```no_run
/// use concert_booking_postgres::{DLQStatus, DeadLetterQueue};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = DeadLetterQueue::new(pool);
///
/// let pending = dlq.list_pending(100).await?;
/// println!("Pending failures: {}", pending.len());
///
/// if let Some(entry) = pending.first() {
///     dlq.update_status(entry.id, DLQStatus::Discarded).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Create a new Dead Letter Queue with the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Add a failed notification to the DLQ.
    ///
    /// Returns the unique ID of the created entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the insert fails.
    pub async fn add_entry(
        &self,
        message: &LogMessage,
        error_message: &str,
        attempts: u32,
    ) -> Result<i64, StoreError> {
        let attempts = i32::try_from(attempts).unwrap_or(i32::MAX);
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO failed_notifications (
                topic, log_partition, log_offset, message_key, payload,
                error_message, attempts
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(&message.topic)
        .bind(message.partition)
        .bind(message.offset)
        .bind(message.key.as_deref())
        .bind(&message.payload)
        .bind(error_message)
        .bind(attempts)
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        tracing::warn!(
            dlq_id = id,
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            error = error_message,
            attempts,
            "Notification added to Dead Letter Queue"
        );

        Ok(id)
    }

    /// List pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<FailedNotification>, StoreError> {
        self.list_by_status(DLQStatus::Pending, limit).await
    }

    /// List entries by status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: DLQStatus,
        limit: usize,
    ) -> Result<Vec<FailedNotification>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM failed_notifications
             WHERE status = $1
             ORDER BY failed_at ASC, id ASC
             LIMIT $2"
        );
        let rows: Vec<FailedNotificationRow> = sqlx::query_as(&sql)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;

        rows.into_iter().map(FailedNotificationRow::into_entry).collect()
    }

    /// Get a specific entry by ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the query fails or the entry does
    /// not exist.
    pub async fn get_by_id(&self, id: i64) -> Result<FailedNotification, StoreError> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM failed_notifications WHERE id = $1");
        let row: FailedNotificationRow = sqlx::query_as(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;

        row.into_entry()
    }

    /// Update the status of an entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the update fails.
    pub async fn update_status(&self, id: i64, status: DLQStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE failed_notifications SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        tracing::info!(dlq_id = id, status = status.as_str(), "DLQ entry status updated");
        Ok(())
    }

    /// Mark an entry as resolved.
    ///
    /// `resolved_by` names who or what resolved it; `notes` say what was done.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the update fails.
    pub async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE failed_notifications
            SET status = 'resolved',
                resolved_at = NOW(),
                resolved_by = $1,
                resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        tracing::info!(dlq_id = id, resolved_by, "DLQ entry marked as resolved");
        metrics::counter!("dead_letters_resolved_total").increment(1);
        Ok(())
    }

    /// Mark an entry as discarded (permanently failed).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE failed_notifications
            SET status = 'discarded',
                resolved_at = NOW(),
                resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        tracing::warn!(dlq_id = id, reason, "DLQ entry marked as discarded");
        metrics::counter!("dead_letters_discarded_total").increment(1);
        Ok(())
    }

    /// Number of pending entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM failed_notifications WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(unavailable)?;

        Ok(count)
    }
}

impl DeadLetterSink for DeadLetterQueue {
    fn bury<'a>(
        &'a self,
        message: &'a LogMessage,
        error: &'a str,
        attempts: u32,
    ) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(self.add_entry(message, error, attempts))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn dlq_status_roundtrip() {
        for status in &[
            DLQStatus::Pending,
            DLQStatus::Resolved,
            DLQStatus::Discarded,
        ] {
            let parsed = DLQStatus::parse(status.as_str()).expect("valid status should parse");
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn dlq_status_invalid() {
        assert!(DLQStatus::parse("invalid").is_err());
        assert!(DLQStatus::parse("processing").is_err());
    }
}
