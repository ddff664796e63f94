//! Consumer-group queue
//!
//! One `GroupQueue` exists per (topic, consumer group). Every consumer that
//! polls under the group name drains the same FIFO queue, so work is split
//! between them rather than duplicated.
//!
//! Concurrency notes:
//! - The message queue and the reader counters have separate locks, both
//!   held only for a few instructions. Nothing is locked while a reader
//!   waits; waiters park on a `Notify` that `write` wakes.
//! - `active_readers` / `idle_sweeps` decide when the sweeper may retire the
//!   queue. A queue is evictable only after it has been seen idle by more
//!   than one sweep with no reader inside `read`.
//! - Once retired, `read` answers [`ReadOutcome::Retired`] and the caller must
//!   look the group up again to get a fresh queue.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::utils::error::BrokerError;

/// Fallback deadline for waits too long to be represented as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

/// Result of a single [`GroupQueue::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// At least one message, in publish order.
    Ready(Vec<String>),
    /// The wait elapsed without traffic.
    Empty,
    /// The queue has been retired by the sweeper and must not be used again.
    Retired,
}

#[derive(Debug, Default)]
struct ReaderCounters {
    active_readers: usize,
    idle_sweeps: u32,
}

impl ReaderCounters {
    fn retired(&self) -> bool {
        self.active_readers == 0 && self.idle_sweeps > 1
    }
}

#[derive(Debug)]
pub struct GroupQueue {
    name: String,
    messages: Mutex<VecDeque<String>>,
    available: Notify,
    counters: Mutex<ReaderCounters>,
}

/// Clamp a requested batch size to at least one message.
pub fn clamp_limit(max_count: i64) -> usize {
    usize::try_from(max_count.max(1)).unwrap_or(usize::MAX)
}

/// Clamp a requested wait (milliseconds) to zero or more.
pub fn clamp_wait(wait_ms: i64) -> Duration {
    Duration::from_millis(wait_ms.max(0).unsigned_abs())
}

impl GroupQueue {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            messages: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            counters: Mutex::new(ReaderCounters::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of messages waiting to be read.
    pub fn pending(&self) -> usize {
        self.messages.lock().len()
    }

    /// Number of calls currently inside [`GroupQueue::read`].
    pub fn active_readers(&self) -> usize {
        self.counters.lock().active_readers
    }

    /// Number of consecutive sweeps that found this queue without readers.
    pub fn idle_sweeps(&self) -> u32 {
        self.counters.lock().idle_sweeps
    }

    /// Append `messages` in order and wake any waiting reader. Never blocks.
    pub fn write(&self, messages: &[String]) {
        if messages.is_empty() {
            return;
        }
        self.messages.lock().extend(messages.iter().cloned());
        self.available.notify_waiters();
    }

    /// Long-poll read of up to `max_count` messages.
    ///
    /// Waits up to `wait_ms` for the first message, then drains whatever else
    /// is already queued without waiting. `max_count` is clamped to at least
    /// 1 and `wait_ms` to at least 0.
    ///
    /// Returns [`BrokerError::Cancelled`] if `cancel` fires first. The reader
    /// count is released on every exit path, including the future being
    /// dropped mid-wait.
    pub async fn read(
        &self,
        max_count: i64,
        wait_ms: i64,
        cancel: &CancellationToken,
    ) -> Result<ReadOutcome, BrokerError> {
        let limit = clamp_limit(max_count);
        let wait = clamp_wait(wait_ms);

        let Some(_reader) = ReaderGuard::attach(self) else {
            return Ok(ReadOutcome::Retired);
        };

        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BrokerError::Cancelled),
            first = self.dequeue(wait) => first,
        };

        let Some(first) = first else {
            return Ok(ReadOutcome::Empty);
        };

        let mut batch = vec![first];
        let mut queue = self.messages.lock();
        while batch.len() < limit {
            match queue.pop_front() {
                Some(message) => batch.push(message),
                None => break,
            }
        }
        Ok(ReadOutcome::Ready(batch))
    }

    /// Called once per sweep cycle. Returns `true` when the queue has had no
    /// readers for more than one consecutive sweep; from then on it is
    /// retired and `read` refuses it.
    pub fn should_evict(&self) -> bool {
        let mut counters = self.counters.lock();
        if counters.active_readers > 0 {
            counters.idle_sweeps = 0;
            return false;
        }
        counters.idle_sweeps = counters.idle_sweeps.saturating_add(1);
        counters.retired()
    }

    async fn dequeue(&self, wait: Duration) -> Option<String> {
        let now = Instant::now();
        let deadline = now.checked_add(wait).unwrap_or(now + FAR_FUTURE);

        loop {
            // Register interest before checking so a concurrent write cannot
            // slip between the check and the wait.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.messages.lock().pop_front() {
                return Some(message);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.messages.lock().pop_front();
            }
        }
    }
}

/// Holds one `active_readers` slot for the lifetime of a read.
struct ReaderGuard<'a> {
    queue: &'a GroupQueue,
}

impl<'a> ReaderGuard<'a> {
    fn attach(queue: &'a GroupQueue) -> Option<Self> {
        let mut counters = queue.counters.lock();
        if counters.retired() {
            return None;
        }
        counters.active_readers += 1;
        Some(Self { queue })
    }
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        let mut counters = self.queue.counters.lock();
        counters.active_readers = counters.active_readers.saturating_sub(1);
        counters.idle_sweeps = 0;
    }
}
