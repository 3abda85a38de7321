//! In-memory notification log, side effects and dead letters.
//!
//! - [`InMemoryNotificationLog`]: single-partition log that is both the
//!   publisher's target and the subscriber's source
//! - [`ScriptedNotifier`]: side effect that fails a scripted number of times
//! - [`InMemoryDeadLetters`]: records buried messages

use concert_booking_core::notification::{
    BookingCreated, DeadLetterSink, LogError, LogMessage, NotificationHandler, NotificationLog,
    NotificationPublisher, PublishError, SideEffectError,
};
use concert_booking_core::store::StoreError;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, watch};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct LogState {
    messages: Vec<LogMessage>,
    // Index of the next message `fetch` returns.
    position: usize,
    // Next offset a restarted consumer would start from.
    committed: i64,
    acked: Vec<i64>,
    redeliveries: usize,
}

/// Single-partition in-memory log.
///
/// Offsets start at 0 and equal the message's index. Cloning shares the log.
///
/// # Example
///
/// ```
/// use concert_booking_testing::InMemoryNotificationLog;
/// use concert_booking_core::notification::NotificationLog;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let log = InMemoryNotificationLog::new("bookings.created");
/// log.append_raw(b"not json".to_vec());
///
/// let message = log.fetch().await?;
/// log.redeliver(&message).await?;
/// assert_eq!(log.fetch().await?.offset, message.offset);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryNotificationLog {
    topic: String,
    state: Arc<Mutex<LogState>>,
    appended: Arc<Notify>,
    paused: Arc<watch::Sender<bool>>,
    fail_publish: Arc<AtomicBool>,
    fail_fetches: Arc<AtomicUsize>,
    fail_acks: Arc<AtomicBool>,
    publish_attempts: Arc<AtomicUsize>,
}

impl InMemoryNotificationLog {
    /// Create an empty log for `topic`.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            topic: topic.into(),
            state: Arc::new(Mutex::new(LogState::default())),
            appended: Arc::new(Notify::new()),
            paused: Arc::new(paused),
            fail_publish: Arc::new(AtomicBool::new(false)),
            fail_fetches: Arc::new(AtomicUsize::new(0)),
            fail_acks: Arc::new(AtomicBool::new(false)),
            publish_attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make `publish` fail with a transport error until turned off.
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` fetches fail.
    pub fn fail_next_fetches(&self, count: usize) {
        self.fail_fetches.store(count, Ordering::SeqCst);
    }

    /// Make `ack` fail until turned off.
    pub fn fail_acks(&self, fail: bool) {
        self.fail_acks.store(fail, Ordering::SeqCst);
    }

    /// Hold every `publish` call until [`resume_publishing`](Self::resume_publishing).
    pub fn pause_publishing(&self) {
        self.paused.send_replace(true);
    }

    /// Release publishes held by [`pause_publishing`](Self::pause_publishing).
    pub fn resume_publishing(&self) {
        self.paused.send_replace(false);
    }

    /// Append a raw payload, bypassing encoding.
    pub fn append_raw(&self, payload: Vec<u8>) {
        self.append(None, payload);
    }

    /// Decoded notifications in log order; malformed payloads are skipped.
    #[must_use]
    pub fn published(&self) -> Vec<BookingCreated> {
        lock(&self.state)
            .messages
            .iter()
            .filter_map(|m| BookingCreated::decode(&m.payload).ok())
            .collect()
    }

    /// Number of messages in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.state).messages.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offsets acknowledged so far, in ack order.
    #[must_use]
    pub fn acked_offsets(&self) -> Vec<i64> {
        lock(&self.state).acked.clone()
    }

    /// Committed consumer offset (next offset to consume after a restart).
    #[must_use]
    pub fn committed_offset(&self) -> i64 {
        lock(&self.state).committed
    }

    /// Number of `redeliver` calls.
    #[must_use]
    pub fn redeliveries(&self) -> usize {
        lock(&self.state).redeliveries
    }

    /// Number of `publish` calls, including failed ones.
    #[must_use]
    pub fn publish_attempts(&self) -> usize {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    fn append(&self, key: Option<String>, payload: Vec<u8>) {
        {
            let mut state = lock(&self.state);
            let offset = i64::try_from(state.messages.len()).unwrap_or(i64::MAX);
            state.messages.push(LogMessage {
                topic: self.topic.clone(),
                partition: 0,
                offset,
                key,
                payload,
            });
        }
        self.appended.notify_one();
    }

    fn next_message(&self) -> Option<LogMessage> {
        let mut state = lock(&self.state);
        let message = state.messages.get(state.position).cloned()?;
        state.position += 1;
        Some(message)
    }
}

impl NotificationPublisher for InMemoryNotificationLog {
    fn publish<'a>(
        &'a self,
        notification: &'a BookingCreated,
    ) -> BoxFuture<'a, Result<(), PublishError>> {
        Box::pin(async move {
            self.publish_attempts.fetch_add(1, Ordering::SeqCst);
            let mut paused = self.paused.subscribe();
            if paused.wait_for(|paused| !*paused).await.is_err() {
                return Err(PublishError::Transport {
                    topic: self.topic.clone(),
                    reason: "log closed".to_string(),
                });
            }

            if self.fail_publish.load(Ordering::SeqCst) {
                return Err(PublishError::Transport {
                    topic: self.topic.clone(),
                    reason: "broker unavailable".to_string(),
                });
            }
            let payload = notification.encode()?;
            self.append(Some(notification.key().to_string()), payload);
            Ok(())
        })
    }
}

impl NotificationLog for InMemoryNotificationLog {
    fn fetch(&self) -> BoxFuture<'_, Result<LogMessage, LogError>> {
        Box::pin(async move {
            let injected = self
                .fail_fetches
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if injected {
                return Err(LogError::Fetch("broker unavailable".to_string()));
            }
            loop {
                if let Some(message) = self.next_message() {
                    return Ok(message);
                }
                self.appended.notified().await;
            }
        })
    }

    fn ack<'a>(&'a self, message: &'a LogMessage) -> BoxFuture<'a, Result<(), LogError>> {
        Box::pin(async move {
            if self.fail_acks.load(Ordering::SeqCst) {
                return Err(LogError::Commit {
                    partition: message.partition,
                    offset: message.offset,
                    reason: "commit rejected".to_string(),
                });
            }
            let mut state = lock(&self.state);
            state.committed = state.committed.max(message.offset + 1);
            state.acked.push(message.offset);
            Ok(())
        })
    }

    fn redeliver<'a>(&'a self, message: &'a LogMessage) -> BoxFuture<'a, Result<(), LogError>> {
        Box::pin(async move {
            let position = usize::try_from(message.offset).map_err(|e| LogError::Seek {
                partition: message.partition,
                offset: message.offset,
                reason: e.to_string(),
            })?;
            let mut state = lock(&self.state);
            state.position = position;
            state.redeliveries += 1;
            Ok(())
        })
    }
}

/// Side effect that fails a scripted number of times, then succeeds.
#[derive(Clone, Debug)]
pub struct ScriptedNotifier {
    failures_left: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    delivered: Arc<Mutex<Vec<BookingCreated>>>,
}

impl ScriptedNotifier {
    /// A notifier that always succeeds.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::failing_times(0)
    }

    /// A notifier whose first `failures` calls fail.
    #[must_use]
    pub fn failing_times(failures: usize) -> Self {
        Self {
            failures_left: Arc::new(AtomicUsize::new(failures)),
            calls: Arc::new(AtomicUsize::new(0)),
            delivered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A notifier that never succeeds.
    #[must_use]
    pub fn always_failing() -> Self {
        Self::failing_times(usize::MAX)
    }

    /// Total `handle` calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Notifications whose side effect succeeded, in order.
    #[must_use]
    pub fn delivered(&self) -> Vec<BookingCreated> {
        lock(&self.delivered).clone()
    }
}

impl NotificationHandler for ScriptedNotifier {
    fn handle<'a>(
        &'a self,
        notification: &'a BookingCreated,
    ) -> BoxFuture<'a, Result<(), SideEffectError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failed {
                return Err(SideEffectError::Failed("notification channel down".to_string()));
            }
            lock(&self.delivered).push(notification.clone());
            Ok(())
        })
    }
}

/// A buried message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    /// Entry id
    pub id: i64,
    /// The message as fetched
    pub message: LogMessage,
    /// Last error
    pub error: String,
    /// Attempts made before giving up
    pub attempts: u32,
}

/// In-memory [`DeadLetterSink`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryDeadLetters {
    entries: Arc<Mutex<Vec<DeadLetter>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryDeadLetters {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `bury` fail until turned off.
    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Buried messages, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<DeadLetter> {
        lock(&self.entries).clone()
    }
}

impl DeadLetterSink for InMemoryDeadLetters {
    fn bury<'a>(
        &'a self,
        message: &'a LogMessage,
        error: &'a str,
        attempts: u32,
    ) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("dead letter table unavailable".to_string()));
            }
            let mut entries = lock(&self.entries);
            let id = i64::try_from(entries.len()).unwrap_or(i64::MAX) + 1;
            entries.push(DeadLetter {
                id,
                message: message.clone(),
                error: error.to_string(),
                attempts,
            });
            Ok(id)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ack_advances_committed_offset() {
        let log = InMemoryNotificationLog::new("t");
        log.append_raw(b"a".to_vec());
        log.append_raw(b"b".to_vec());

        let first = log.fetch().await.unwrap();
        log.ack(&first).await.unwrap();

        assert_eq!(log.committed_offset(), 1);
        assert_eq!(log.fetch().await.unwrap().offset, 1);
    }

    #[tokio::test]
    async fn fetch_waits_for_append() {
        let log = InMemoryNotificationLog::new("t");
        let reader = log.clone();
        let fetch = tokio::spawn(async move { reader.fetch().await });

        tokio::task::yield_now().await;
        log.append_raw(b"late".to_vec());

        let message = fetch.await.unwrap().unwrap();
        assert_eq!(message.payload, b"late".to_vec());
    }

    #[tokio::test]
    async fn scripted_notifier_recovers_after_failures() {
        let notifier = ScriptedNotifier::failing_times(1);
        let notification = BookingCreated {
            booking_id: "b".into(),
            user_id: "u".into(),
            concert_id: "c".into(),
            seat: 1,
            amount: 0.0,
        };

        assert!(notifier.handle(&notification).await.is_err());
        assert!(notifier.handle(&notification).await.is_ok());
        assert_eq!(notifier.calls(), 2);
        assert_eq!(notifier.delivered().len(), 1);
    }
}
