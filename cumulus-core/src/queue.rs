use crate::prelude::*;
use parking_lot::Condvar;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Error raised when a timed queue operation exceeds its deadline.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("timed out after {0:?} waiting on queue")]
pub struct QueueTimeout(pub Duration);

/// Unbounded blocking FIFO shared between multiple producers and consumers.
///
/// Elements are dequeued strictly in enqueue order. [`Queue::peek`] blocks
/// until an element is available but does not consume it, so repeated peeks
/// observe the same head until somebody dequeues.
#[derive(Debug)]
pub struct Queue<T> {
    inner: Mutex<VecDeque<T>>,
    enqueued: Condvar,
    drained: Condvar,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            enqueued: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    pub fn enqueue(&self, value: T) {
        self.inner.lock().push_back(value);
        self.enqueued.notify_one();
    }

    /// Remove and return the head of the queue, blocking until one arrives.
    pub fn dequeue(&self) -> T {
        let mut inner = self.inner.lock();
        loop {
            if let Some(value) = inner.pop_front() {
                if inner.is_empty() {
                    self.drained.notify_all();
                }
                return value;
            }

            self.enqueued.wait(&mut inner);
        }
    }

    /// Remove and return the head of the queue, giving up after `timeout`.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Result<T, QueueTimeout> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(value) = inner.pop_front() {
                if inner.is_empty() {
                    self.drained.notify_all();
                }
                return Ok(value);
            }

            if self.enqueued.wait_until(&mut inner, deadline).timed_out() {
                return Err(QueueTimeout(timeout));
            }
        }
    }

    /// Return a copy of the head without consuming it, blocking until one arrives.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        let mut inner = self.inner.lock();
        loop {
            if let Some(value) = inner.front() {
                return value.clone();
            }

            self.enqueued.wait(&mut inner);
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Discard every queued element.
    pub fn drain(&self) {
        self.inner.lock().clear();
        self.drained.notify_all();
    }

    /// Block until consumers have emptied the queue.
    pub fn wait_to_drain(&self, timeout: Duration) -> Result<(), QueueTimeout> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while !inner.is_empty() {
            if self.drained.wait_until(&mut inner, deadline).timed_out() {
                return Err(QueueTimeout(timeout));
            }
        }

        Ok(())
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}
