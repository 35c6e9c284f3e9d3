//! A reader/writer lock built from a single signed counter protected by a
//! mutex and condition variable (spec.md §4.3).
//!
//! `v >= 0` means `v` readers hold the lock (`0` is free); `v == -1` means
//! one writer holds it exclusively. Every transition happens under the
//! mutex; a single condition variable serves both reader and writer
//! waiters (see the "Known limitation" doc on [`RwLock::release_write`]).

use parking_lot::{Condvar, Mutex};
use threadkit_core::{Deadline, Error, Result};
use tracing::trace;

const WRITER: i64 = -1;

/// A reader/writer lock with blocking and timed acquire.
///
/// Unlike `std::sync::RwLock`, this type does not wrap a value — it is a
/// bare synchronization primitive, matching spec.md's data model of a
/// signed counter with no payload. Callers guard their own shared data and
/// use this type purely for the acquire/release discipline.
pub struct RwLock {
    v: Mutex<i64>,
    condvar: Condvar,
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RwLock {
    /// Create a new, unheld lock (`v == 0`).
    #[must_use]
    pub fn new() -> Self {
        RwLock {
            v: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// Block until the lock can be acquired for reading, then acquire it.
    pub fn acquire_read(&self) {
        let mut v = self.v.lock();
        while *v == WRITER {
            self.condvar.wait(&mut v);
        }
        *v += 1;
        trace!(v = *v, "rwlock acquire_read");
    }

    /// Block until the lock can be acquired exclusively, then acquire it.
    pub fn acquire_write(&self) {
        let mut v = self.v.lock();
        while *v != 0 {
            self.condvar.wait(&mut v);
        }
        *v = WRITER;
        trace!("rwlock acquire_write");
    }

    /// Release one reader's hold on the lock.
    ///
    /// Always wakes exactly one waiter: since concurrent readers are
    /// allowed, a release need not drop the count to zero to let another
    /// waiting reader proceed.
    ///
    /// # Panics
    ///
    /// Panics (debug assertion) if called when no reader holds the lock —
    /// that indicates a caller bug, not a runtime condition callers should
    /// be expected to handle.
    pub fn release_read(&self) {
        let mut v = self.v.lock();
        debug_assert!(*v > 0, "release_read called without a held read lock");
        *v -= 1;
        trace!(v = *v, "rwlock release_read");
        drop(v);
        self.condvar.notify_one();
    }

    /// Release the exclusive hold on the lock.
    ///
    /// # Known limitation (spec.md §4.3, §9)
    ///
    /// A single condition variable serves both readers and writers, so
    /// waking "one waiter" here may wake a writer or exactly one of
    /// several waiting readers — other blocked readers that could have
    /// proceeded concurrently remain asleep until that reader releases in
    /// turn. Spec.md explicitly permits (but does not require) broadcasting
    /// here instead of signaling to unblock a whole cohort of readers at
    /// once; this implementation keeps the literal signal-one behavior the
    /// state machine describes. No correctness property depends on which
    /// choice is made — only latency under contention.
    ///
    /// # Panics
    ///
    /// Panics (debug assertion) if called when no writer holds the lock.
    pub fn release_write(&self) {
        let mut v = self.v.lock();
        debug_assert_eq!(*v, WRITER, "release_write called without a held write lock");
        *v = 0;
        trace!("rwlock release_write");
        drop(v);
        self.condvar.notify_one();
    }

    /// Acquire for reading, bounded by `timeout_ms`. On timeout, the lock
    /// state is left exactly as it was found.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the deadline elapses before the lock
    /// can be acquired.
    pub fn timed_acquire_read(&self, timeout_ms: u64) -> Result<()> {
        let deadline = Deadline::after_ms(timeout_ms);
        let mut v = self.v.lock();
        while *v == WRITER {
            let remaining = deadline.remaining();
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            let timed_out = self.condvar.wait_for(&mut v, remaining).timed_out();
            if timed_out && *v == WRITER {
                return Err(Error::Timeout);
            }
        }
        *v += 1;
        trace!(v = *v, "rwlock timed_acquire_read");
        Ok(())
    }

    /// Acquire exclusively, bounded by `timeout_ms`. On timeout, the lock
    /// state is left exactly as it was found — this implementation always
    /// releases its internal mutex on every path, including the
    /// condition-variable error path the original source neglected (see
    /// spec.md §9's open question on this exact bug).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the deadline elapses before the lock
    /// can be acquired.
    pub fn timed_acquire_write(&self, timeout_ms: u64) -> Result<()> {
        let deadline = Deadline::after_ms(timeout_ms);
        let mut v = self.v.lock();
        while *v != 0 {
            let remaining = deadline.remaining();
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            let timed_out = self.condvar.wait_for(&mut v, remaining).timed_out();
            if timed_out && *v != 0 {
                return Err(Error::Timeout);
            }
        }
        *v = WRITER;
        trace!("rwlock timed_acquire_write");
        Ok(())
    }
}
