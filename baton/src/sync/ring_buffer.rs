//! Bounded blocking ring buffer over caller-supplied storage.
//!
//! [`RingBuffer`] hands values from any number of producer threads to any
//! number of consumer threads. Producers block while the buffer is full,
//! consumers block while it is empty, and [`RingBuffer::interrupt`] cancels a
//! single pending or future [`RingBuffer::dequeue`].
//!
//! # Example
//!
//! ```
//! use baton::sync::RingBuffer;
//!
//! let mut storage = [0u32; 8];
//! let queue = RingBuffer::from_slice(&mut storage)?;
//!
//! std::thread::scope(|s| {
//!     s.spawn(|| {
//!         for i in 0..32 {
//!             queue.enqueue(i);
//!         }
//!     });
//!
//!     for i in 0..32 {
//!         assert_eq!(queue.dequeue(), Some(i));
//!     }
//! });
//! # Ok::<(), baton::sync::CapacityError>(())
//! ```
//!
//! # Locking
//!
//! ```text
//!   enqueue ──► writer lock ──► slot[write] ──► len += 1 ──► wake reader
//!   dequeue ──► reader lock ──► slot[read]  ──► len -= 1 ──► wake writer
//! ```
//!
//! The two sides never hold each other's lock while touching slots. `len`
//! is atomic so both wait predicates can observe it. To wake the other side
//! a thread first drops its own lock, then passes through the other side's
//! lock before notifying. A waiter that checked its predicate just before
//! the update is therefore already parked when the notification arrives.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use minstant::Instant;
use parking_lot::{Condvar, Mutex, MutexGuard};
use thiserror::Error;

use crate::ring::Slots;
use crate::trace::{debug, trace};

/// Timeout specification for blocking operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl Timeout {
    /// Converts to an absolute deadline. `None` means never.
    fn deadline(self) -> Option<Instant> {
        match self {
            Self::Infinite => None,
            Self::Duration(d) => Instant::now().checked_add(d),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// Storage/capacity combination rejected by [`RingBuffer::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CapacityError {
    #[error("capacity must be greater than 0")]
    Zero,

    #[error("storage too small: need {capacity} slots, have {available}")]
    StorageTooSmall { capacity: usize, available: usize },
}

/// Why [`RingBuffer::dequeue_timeout`] returned without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DequeueError {
    #[error("dequeue interrupted")]
    Interrupted,

    #[error("dequeue timed out")]
    TimedOut,
}

/// State owned by whoever holds the write lock.
struct WriteSide {
    cursor: usize,
}

/// State owned by whoever holds the read lock.
struct ReadSide {
    cursor: usize,
}

/// Fixed-capacity blocking FIFO over storage borrowed from the caller.
///
/// The buffer takes an exclusive borrow of its storage, so the storage
/// outlives the buffer and cannot be touched behind its back. Threads
/// blocked in [`enqueue`](Self::enqueue) or [`dequeue`](Self::dequeue) hold
/// a shared borrow of the buffer, so it cannot be dropped under them either.
/// Use [`interrupt`](Self::interrupt) to release consumers before teardown.
///
/// # Thread Safety
///
/// `RingBuffer` is [`Send`] and [`Sync`] when `T: Send`. Share it by
/// reference with scoped threads, or through an `Arc` when the storage is
/// `'static`.
pub struct RingBuffer<'a, T> {
    slots: Slots<'a, T>,

    /// Occupied slots. Written by both sides, read by both predicates.
    len: AtomicUsize,

    /// Pending cancellation of one dequeue. Only modified under `reader`.
    interrupted: AtomicBool,

    writer: Mutex<WriteSide>,
    reader: Mutex<ReadSide>,

    /// Signalled when a slot is freed.
    not_full: Condvar,

    /// Signalled when a slot is filled or an interrupt is raised.
    not_empty: Condvar,
}

impl<'a, T: Copy> RingBuffer<'a, T> {
    /// Creates a buffer over the first `capacity` slots of `storage`.
    ///
    /// # Errors
    ///
    /// - [`CapacityError::Zero`] if `capacity` is 0
    /// - [`CapacityError::StorageTooSmall`] if `storage` has fewer than
    ///   `capacity` elements
    pub fn new(storage: &'a mut [T], capacity: usize) -> Result<Self, CapacityError> {
        if capacity == 0 {
            return Err(CapacityError::Zero);
        }

        let available = storage.len();
        if available < capacity {
            return Err(CapacityError::StorageTooSmall {
                capacity,
                available,
            });
        }

        debug!(capacity, available, "ring buffer created");

        Ok(Self {
            slots: Slots::new(&mut storage[..capacity]),
            len: AtomicUsize::new(0),
            interrupted: AtomicBool::new(false),
            writer: Mutex::new(WriteSide { cursor: 0 }),
            reader: Mutex::new(ReadSide { cursor: 0 }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        })
    }

    /// Creates a buffer using all of `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError::Zero`] if `storage` is empty.
    pub fn from_slice(storage: &'a mut [T]) -> Result<Self, CapacityError> {
        let capacity = storage.len();
        Self::new(storage, capacity)
    }

    /// Appends `value`, blocking while the buffer is full.
    ///
    /// Enqueues are serialized against each other, not against dequeues.
    /// There is no way to cancel a blocked enqueue; use
    /// [`enqueue_timeout`](Self::enqueue_timeout) if the consumers may stop
    /// draining.
    pub fn enqueue(&self, value: T) {
        // An infinite wait only returns once the value is stored.
        let _ = self.push_until(value, None);
    }

    /// Appends `value`, blocking at most `timeout` while the buffer is full.
    ///
    /// # Errors
    ///
    /// Returns `Err(value)` if the buffer is still full at the deadline.
    pub fn enqueue_timeout(&self, value: T, timeout: impl Into<Timeout>) -> Result<(), T> {
        self.push_until(value, timeout.into().deadline())
    }

    /// Removes the oldest value, blocking while the buffer is empty.
    ///
    /// Returns `None` only when the call was cancelled by
    /// [`interrupt`](Self::interrupt); emptiness alone never returns. A
    /// pending interrupt wins over an available value, and the value stays
    /// buffered for the next call.
    #[must_use]
    pub fn dequeue(&self) -> Option<T> {
        self.pop_until(None).ok()
    }

    /// Removes the oldest value, blocking at most `timeout` while the buffer
    /// is empty.
    ///
    /// # Errors
    ///
    /// - [`DequeueError::Interrupted`] if this call consumed a pending
    ///   interrupt
    /// - [`DequeueError::TimedOut`] if nothing arrived before the deadline
    ///   and no interrupt is pending
    pub fn dequeue_timeout(&self, timeout: impl Into<Timeout>) -> Result<T, DequeueError> {
        self.pop_until(timeout.into().deadline())
    }

    /// Cancels one pending or future dequeue.
    ///
    /// If a consumer is blocked it wakes and returns `None`; otherwise the
    /// next dequeue does. Repeated calls before a dequeue observes the
    /// interrupt coalesce into one. Enqueues and buffered values are not
    /// affected.
    pub fn interrupt(&self) {
        let _reader = self.reader.lock();
        self.interrupted.store(true, Ordering::Relaxed);
        trace!("interrupt raised");
        self.not_empty.notify_one();
    }

    /// Number of slots.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of buffered values at the time of the call.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Whether an interrupt is raised and not yet consumed by a dequeue.
    #[inline]
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    fn push_until(&self, value: T, deadline: Option<Instant>) -> Result<(), T> {
        {
            let mut writer = self.writer.lock();

            while self.is_full() {
                trace!(capacity = self.capacity(), "enqueue blocked on full buffer");
                if !park(&self.not_full, &mut writer, deadline) {
                    trace!("enqueue timed out");
                    return Err(value);
                }
            }

            // SAFETY: len < capacity, so the slot under the write cursor is
            // free. Only the write-lock holder writes slots, and readers
            // cannot reach this slot until the increment below publishes it.
            unsafe { self.slots.write(writer.cursor, value) };
            writer.cursor = self.slots.bump_cursor(writer.cursor);
            self.len.fetch_add(1, Ordering::Release);
        }

        wake(&self.reader, &self.not_empty);
        Ok(())
    }

    fn pop_until(&self, deadline: Option<Instant>) -> Result<T, DequeueError> {
        let value = {
            let mut reader = self.reader.lock();

            loop {
                if self.interrupted.swap(false, Ordering::Relaxed) {
                    trace!(len = self.len(), "dequeue interrupted");
                    // This call may have absorbed a wake-up meant for a
                    // value; hand it on so the value is not stranded.
                    if !self.is_empty() {
                        self.not_empty.notify_one();
                    }
                    return Err(DequeueError::Interrupted);
                }

                if !self.is_empty() {
                    break;
                }

                trace!("dequeue blocked on empty buffer");
                if !park(&self.not_empty, &mut reader, deadline) {
                    trace!("dequeue timed out");
                    return Err(DequeueError::TimedOut);
                }
            }

            // SAFETY: len > 0, so the slot under the read cursor was written
            // and published by an enqueue (Acquire in is_empty pairs with its
            // Release). Writers cannot reuse the slot until the decrement
            // below frees it.
            let value = unsafe { self.slots.read(reader.cursor) };
            reader.cursor = self.slots.bump_cursor(reader.cursor);
            self.len.fetch_sub(1, Ordering::Release);
            value
        };

        wake(&self.writer, &self.not_full);
        Ok(value)
    }
}

/// Parks on `cond` until notified or `deadline` passes.
///
/// Returns `false` without parking if the deadline has already passed, so
/// callers re-check their predicate once after a timed-out wait.
fn park<S>(cond: &Condvar, guard: &mut MutexGuard<'_, S>, deadline: Option<Instant>) -> bool {
    match deadline {
        None => {
            cond.wait(guard);
            true
        }
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            // Whether this wait timed out is irrelevant; the caller loops.
            let _ = cond.wait_for(guard, deadline.duration_since(now));
            true
        }
    }
}

/// Wakes one waiter on the opposite side.
///
/// Passing through `lock` orders the notification after any waiter that has
/// already checked its predicate under that lock.
fn wake<S>(lock: &Mutex<S>, cond: &Condvar) {
    drop(lock.lock());
    cond.notify_one();
}

impl<T: Copy> fmt::Debug for RingBuffer<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("interrupted", &self.is_interrupted())
            .finish_non_exhaustive()
    }
}
