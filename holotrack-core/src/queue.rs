//! Order-preserving work queues between pipeline stages.
//!
//! A [`WorkQueue`] is a cheap, cloneable handle; the producer stage and the
//! consumer stage each hold one. Items come out in the order they went in.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

struct Inner<T> {
    items: Mutex<VecDeque<T>>,
    not_full: Condvar,
    capacity: Option<usize>,
    closed: AtomicBool,
    detached: AtomicBool,
}

/// Thread-safe, closeable FIFO channel.
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("len", &self.len())
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.is_closed())
            .field("detached", &self.is_detached())
            .finish()
    }
}

impl<T> WorkQueue<T> {
    /// Creates an unbounded queue.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    /// Creates a queue holding at most `capacity` items.
    ///
    /// `push` waits while the queue is full, until the consumer collects or
    /// detaches.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self::with_limit(Some(capacity.max(1)))
    }

    fn with_limit(capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::new()),
                not_full: Condvar::new(),
                capacity,
                closed: AtomicBool::new(false),
                detached: AtomicBool::new(false),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.inner
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an item.
    pub fn push(&self, item: T) {
        let mut items = self.lock();
        if let Some(capacity) = self.inner.capacity {
            while items.len() >= capacity && !self.is_detached() {
                items = self
                    .inner
                    .not_full
                    .wait(items)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        items.push_back(item);
    }

    /// Moves every available item into `buffer`, oldest first.
    ///
    /// Never blocks waiting for items. Returns the number of items moved.
    pub fn collect(&self, buffer: &mut VecDeque<T>) -> usize {
        let mut items = self.lock();
        let n = items.len();
        buffer.append(&mut items);
        drop(items);
        if n > 0 {
            self.inner.not_full.notify_all();
        }
        n
    }

    /// Marks that no further items will be pushed.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True once the queue is closed and fully drained.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        // Closed first: every push happens before close, so an empty queue
        // observed after the close can never be refilled.
        self.is_closed() && self.is_empty()
    }

    /// Marks that the consumer has gone away.
    ///
    /// Wakes any producer waiting on a full bounded queue.
    pub fn detach(&self) {
        self.inner.detached.store(true, Ordering::SeqCst);
        let _guard = self.lock();
        self.inner.not_full.notify_all();
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::SeqCst)
    }
}
