//! Bounded blocking queue linking the modulator thread to I/O
//! workers.
//!
//! A consumer can ask for a prebuffering threshold, so the SDR
//! worker can refill after underruns before resuming. Instead of a
//! wakeup exception, the blocking pop returns [`Pop::Wakeup`] when
//! another thread calls [`ThreadsafeQueue::trigger_wakeup`].

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Result of a blocking pop.
#[derive(Debug, PartialEq)]
pub enum Pop<T> {
    Item(T),
    Wakeup,
}

struct Inner<T> {
    queue: VecDeque<T>,
    wakeup_requested: bool,
}

pub struct ThreadsafeQueue<T> {
    inner: Mutex<Inner<T>>,
    rx_notify: Condvar,
    tx_notify: Condvar,
}

impl<T> ThreadsafeQueue<T> {
    pub fn new() -> Self {
        ThreadsafeQueue {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                wakeup_requested: false,
            }),
            rx_notify: Condvar::new(),
            tx_notify: Condvar::new(),
        }
    }

    /// Push and notify; if `max_size > 0` and the queue is full the
    /// element is discarded. Returns the new queue size.
    pub fn push(&self, val: T, max_size: usize) -> usize {
        let mut inner = self.inner.lock().unwrap();
        if max_size == 0 || inner.queue.len() < max_size {
            inner.queue.push_back(val);
        }
        let size = inner.queue.len();
        drop(inner);
        self.rx_notify.notify_one();
        size
    }

    /// Push, blocking while the queue holds `threshold` or more
    /// elements. A pending wakeup releases the wait (without
    /// consuming the wakeup), so shutdown cannot deadlock a blocked
    /// producer. Returns the new queue size.
    pub fn push_wait_if_full(&self, val: T, threshold: usize) -> usize {
        let mut inner = self.inner.lock().unwrap();
        while inner.queue.len() >= threshold && !inner.wakeup_requested {
            inner = self.tx_notify.wait(inner).unwrap();
        }
        inner.queue.push_back(val);
        let size = inner.queue.len();
        drop(inner);
        self.rx_notify.notify_one();
        size
    }

    /// Block until at least `prebuffering` elements are queued or a
    /// wakeup is requested, then pop one element.
    pub fn wait_and_pop(&self, prebuffering: usize) -> Pop<T> {
        let mut inner = self.inner.lock().unwrap();
        while inner.queue.len() < prebuffering.max(1) && !inner.wakeup_requested {
            inner = self.rx_notify.wait(inner).unwrap();
        }
        if inner.wakeup_requested {
            inner.wakeup_requested = false;
            return Pop::Wakeup;
        }
        let val = inner.queue.pop_front().expect("queue length checked");
        drop(inner);
        self.tx_notify.notify_one();
        Pop::Item(val)
    }

    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        let val = inner.queue.pop_front();
        if val.is_some() {
            drop(inner);
            self.tx_notify.notify_one();
        }
        val
    }

    /// Make a blocked consumer return [`Pop::Wakeup`]. Also releases
    /// a producer blocked in [`Self::push_wait_if_full`].
    pub fn trigger_wakeup(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.wakeup_requested = true;
        drop(inner);
        self.rx_notify.notify_all();
        self.tx_notify.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for ThreadsafeQueue<T> {
    fn default() -> Self {
        ThreadsafeQueue::new()
    }
}
