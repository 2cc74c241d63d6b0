//! Inbound feed: log lines and status snapshots from the process layer.
//!
//! [`LogFeed`] fans published events out to subscribers. [`FeedBatcher`] sits
//! in front of it on the producer side and coalesces bursts of log lines so
//! subscribers see a handful of batches instead of thousands of events.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use devstack_core::{Config, LogEvent, StatusSnapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One delivery from the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum FeedEvent {
    Log(LogEvent),
    LogBatch(Vec<LogEvent>),
    Status(StatusSnapshot),
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("log feed is closed")]
    Closed,

    #[error("failed to spawn feed worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Subscriber callback. Returning `false` unsubscribes it. Callbacks run on
/// the publishing thread with the subscriber list locked, so they must not
/// subscribe or unsubscribe themselves.
pub type FeedCallback = Box<dyn Fn(&FeedEvent) -> bool + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: FeedCallback,
}

#[derive(Default)]
struct FeedInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl FeedInner {
    fn remove(&self, id: u64) -> bool {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|sub| sub.id != id);
        subscribers.len() != before
    }
}

/// Multi-subscriber event feed. Cloning yields another handle to the same
/// feed.
#[derive(Clone, Default)]
pub struct LogFeed {
    inner: Arc<FeedInner>,
}

impl std::fmt::Debug for LogFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFeed")
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl LogFeed {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for every later event until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, callback: F) -> Result<Subscription, FeedError>
    where
        F: Fn(&FeedEvent) -> bool + Send + Sync + 'static,
    {
        if self.is_closed() {
            return Err(FeedError::Closed);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                id,
                callback: Box::new(callback),
            });
        tracing::debug!(subscription = id, "feed subscriber added");
        Ok(Subscription {
            feed: Arc::downgrade(&self.inner),
            id,
            active: true,
        })
    }

    /// Deliver `event` to every subscriber in registration order. Returns
    /// how many received it.
    pub fn publish(&self, event: &FeedEvent) -> usize {
        if self.is_closed() {
            return 0;
        }
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|sub| (sub.callback)(event));
        let dropped = before - subscribers.len();
        if dropped > 0 {
            tracing::debug!(dropped, "feed subscribers detached themselves");
        }
        before
    }

    /// Stop delivering and refuse new subscriptions.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Live registration on a [`LogFeed`]; unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    feed: Weak<FeedInner>,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    /// Whether the subscriber is still registered (it may have detached
    /// itself by returning `false`, or the feed may be gone).
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
            && self.feed.upgrade().is_some_and(|inner| {
                inner
                    .subscribers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .any(|sub| sub.id == self.id)
            })
    }

    fn detach(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(inner) = self.feed.upgrade()
            && inner.remove(self.id)
        {
            tracing::debug!(subscription = self.id, "feed subscriber removed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

// ──────────────────────────────────────────────────────────────────────
// Producer-side batching
// ──────────────────────────────────────────────────────────────────────

/// Raw event from the process layer before batching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ManagerEvent {
    Log(LogEvent),
    Status(StatusSnapshot),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatcherStats {
    pub lines_forwarded: u64,
    pub batches_published: u64,
    pub lines_dropped: u64,
}

#[derive(Default)]
struct BatcherCounters {
    lines_forwarded: AtomicU64,
    batches_published: AtomicU64,
    lines_dropped: AtomicU64,
}

impl BatcherCounters {
    fn snapshot(&self) -> BatcherStats {
        BatcherStats {
            lines_forwarded: self.lines_forwarded.load(Ordering::Relaxed),
            batches_published: self.batches_published.load(Ordering::Relaxed),
            lines_dropped: self.lines_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Coalesces log lines for a [`LogFeed`] on a background thread.
///
/// Pending lines are flushed when the flush interval elapses or when the
/// batch size is reached; a single pending line goes out as
/// [`FeedEvent::Log`], more as [`FeedEvent::LogBatch`]. Status snapshots
/// flush pending lines and are published immediately after them.
pub struct FeedBatcher {
    feed: LogFeed,
    flush_interval: Duration,
    batch_size: usize,
    queue_capacity: usize,
}

/// Producer handle returned by [`FeedBatcher::start`]. Dropping it stops
/// the worker after flushing pending lines.
pub struct FeedBatcherHandle {
    sender: Option<SyncSender<ManagerEvent>>,
    stop: Arc<AtomicBool>,
    counters: Arc<BatcherCounters>,
    join: Option<JoinHandle<()>>,
}

impl FeedBatcher {
    #[must_use]
    pub fn new(feed: LogFeed, config: &Config) -> Self {
        Self {
            feed,
            flush_interval: config.feed_flush_interval(),
            batch_size: config.feed_batch_size.max(1),
            queue_capacity: config.feed_queue_capacity.max(1),
        }
    }

    /// Override the flush interval (for tests).
    #[must_use]
    pub const fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Spawn the background batching thread.
    pub fn start(self) -> Result<FeedBatcherHandle, FeedError> {
        let (sender, receiver) = mpsc::sync_channel(self.queue_capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(BatcherCounters::default());
        let worker_stop = Arc::clone(&stop);
        let worker_counters = Arc::clone(&counters);
        let join = thread::Builder::new()
            .name("devstack-feed-batcher".into())
            .spawn(move || self.run(&receiver, &worker_stop, &worker_counters))?;
        Ok(FeedBatcherHandle {
            sender: Some(sender),
            stop,
            counters,
            join: Some(join),
        })
    }

    fn run(self, receiver: &Receiver<ManagerEvent>, stop: &AtomicBool, counters: &BatcherCounters) {
        tracing::info!(
            flush_ms = u64::try_from(self.flush_interval.as_millis()).unwrap_or(u64::MAX),
            batch_size = self.batch_size,
            "feed batcher started"
        );
        let mut pending: Vec<LogEvent> = Vec::with_capacity(self.batch_size);
        let mut deadline: Option<Instant> = None;

        loop {
            let timeout = deadline.map_or(self.flush_interval, |at| {
                at.saturating_duration_since(Instant::now())
            });
            match receiver.recv_timeout(timeout) {
                Ok(ManagerEvent::Log(event)) => {
                    if pending.is_empty() {
                        deadline = Some(Instant::now() + self.flush_interval);
                    }
                    pending.push(event);
                    if pending.len() >= self.batch_size {
                        self.flush(&mut pending, counters);
                        deadline = None;
                    }
                }
                Ok(ManagerEvent::Status(snapshot)) => {
                    self.flush(&mut pending, counters);
                    deadline = None;
                    self.feed.publish(&FeedEvent::Status(snapshot));
                }
                Err(RecvTimeoutError::Timeout) => {
                    if deadline.is_some_and(|at| Instant::now() >= at) {
                        self.flush(&mut pending, counters);
                        deadline = None;
                    }
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.flush(&mut pending, counters);
        tracing::info!("feed batcher stopped");
    }

    fn flush(&self, pending: &mut Vec<LogEvent>, counters: &BatcherCounters) {
        let count = pending.len();
        let event = match count {
            0 => return,
            1 => match pending.pop() {
                Some(only) => FeedEvent::Log(only),
                None => return,
            },
            _ => FeedEvent::LogBatch(std::mem::replace(
                pending,
                Vec::with_capacity(self.batch_size),
            )),
        };
        self.feed.publish(&event);
        counters
            .lines_forwarded
            .fetch_add(count as u64, Ordering::Relaxed);
        counters.batches_published.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(count, "feed batch flushed");
    }
}

impl FeedBatcherHandle {
    /// Queue a raw event. Log lines are dropped when the queue is full;
    /// status snapshots wait for room. Returns whether it was queued.
    pub fn send(&self, event: ManagerEvent) -> bool {
        let Some(sender) = self.sender.as_ref() else {
            return false;
        };
        match event {
            ManagerEvent::Log(_) => match sender.try_send(event) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    let dropped = self.counters.lines_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped.is_power_of_two() {
                        tracing::warn!(dropped, "feed queue full, dropping log lines");
                    }
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
            ManagerEvent::Status(_) => sender.send(event).is_ok(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> BatcherStats {
        self.counters.snapshot()
    }

    /// Flush pending lines, stop the worker, and wait for it to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.sender = None;
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for FeedBatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
