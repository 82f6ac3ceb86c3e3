//! Per-client outbound queue for poll clients.
//!
//! Replies and broadcasts addressed to a poll client are buffered here until
//! the client fetches them. Each entry is handed out at most once, in FIFO
//! order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use switchboard_core::Message;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::config::{OverflowPolicy, PollConfig};

/// Returned by [`PollQueue::push`] when the queue is full under
/// [`OverflowPolicy::Reject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

/// Bounded FIFO of undelivered messages for one poll client.
#[derive(Debug)]
pub struct PollQueue {
    entries: Mutex<VecDeque<Message>>,
    capacity: usize,
    overflow: OverflowPolicy,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl PollQueue {
    /// Creates an empty queue. A capacity of 0 is treated as 1.
    #[must_use]
    pub fn new(config: &PollConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            overflow: config.overflow,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueues a message, applying the overflow policy when full.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` if the queue is at capacity and the policy is
    /// `Reject`.
    pub fn push(&self, message: Message) -> Result<(), QueueFull> {
        {
            let mut entries = self.entries.lock();
            if entries.len() >= self.capacity {
                match self.overflow {
                    OverflowPolicy::DropOldest => {
                        entries.pop_front();
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    OverflowPolicy::Reject => return Err(QueueFull),
                }
            }
            entries.push_back(message);
        }
        // Pollers register before they drain, so no permit is needed.
        self.notify.notify_waiters();
        Ok(())
    }

    /// Removes and returns up to `max` messages, oldest first.
    pub fn drain(&self, max: usize) -> Vec<Message> {
        let mut entries = self.entries.lock();
        let n = max.min(entries.len());
        entries.drain(..n).collect()
    }

    /// Like [`drain`](Self::drain), but if the queue is empty waits up to
    /// `wait` for the first message to arrive.
    pub async fn wait_drain(&self, max: usize, wait: Duration) -> Vec<Message> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.drain(max);
            if !batch.is_empty() || self.is_closed() {
                return batch;
            }
            // Timing out just means an empty poll.
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return batch;
            }
        }
    }

    /// Wakes any waiting poller; subsequent waits return immediately.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of entries evicted by `DropOldest`.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
