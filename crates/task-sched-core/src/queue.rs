use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Thread-safe FIFO queue with blocking and non-blocking consumers.
///
/// The scheduler treats the queue as a capability: any implementation that
/// honors these semantics can back the distributor's pending-task and
/// available-worker pools. Two implementations ship ([`MutexQueue`] and
/// [`LockFreeQueue`]); both are validated by one shared conformance suite.
///
/// Close semantics: `close` is idempotent and wakes every blocked popper;
/// once closed, `pop_wait` resolves to `None` (even if items remain) and
/// `push` is ignored. `try_pop` keeps draining leftover items.
#[async_trait]
pub trait BlockingQueue<T: Send + 'static>: Send + Sync {
    /// Push an item, waking one blocked consumer. Ignored once closed.
    fn push(&self, item: T);

    /// Pop immediately without blocking.
    fn try_pop(&self) -> Option<T>;

    /// Wait until an item is available or the queue is closed, returning
    /// `None` in the latter case.
    async fn pop_wait(&self) -> Option<T>;

    /// Close the queue and wake all blocked consumers.
    fn close(&self);

    fn is_closed(&self) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Coarse-grained queue: a mutex around a `VecDeque`.
pub struct MutexQueue<T> {
    items: Mutex<VecDeque<T>>,
    closed: AtomicBool,
    available: Notify,
}

impl<T> MutexQueue<T> {
    pub fn new() -> Self {
        MutexQueue {
            items: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            available: Notify::new(),
        }
    }
}

impl<T> Default for MutexQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> BlockingQueue<T> for MutexQueue<T> {
    fn push(&self, item: T) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.items.lock().push_back(item);
        self.available.notify_one();
    }

    fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    async fn pop_wait(&self) -> Option<T> {
        loop {
            // Register interest before checking state so a push or close
            // landing between the check and the await still wakes us.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            notified.await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.available.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }
}

/// Lock-free queue: a `crossbeam` segmented queue for the item storage,
/// with the same notification scheme as [`MutexQueue`] for blocked poppers.
pub struct LockFreeQueue<T> {
    items: SegQueue<T>,
    closed: AtomicBool,
    available: Notify,
}

impl<T> LockFreeQueue<T> {
    pub fn new() -> Self {
        LockFreeQueue {
            items: SegQueue::new(),
            closed: AtomicBool::new(false),
            available: Notify::new(),
        }
    }
}

impl<T> Default for LockFreeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> BlockingQueue<T> for LockFreeQueue<T> {
    fn push(&self, item: T) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.items.push(item);
        self.available.notify_one();
    }

    fn try_pop(&self) -> Option<T> {
        self.items.pop()
    }

    async fn pop_wait(&self) -> Option<T> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            notified.await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.available.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}
