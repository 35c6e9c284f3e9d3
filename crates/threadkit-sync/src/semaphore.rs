//! A blocking/timed counting semaphore built from a mutex and a condition
//! variable (spec.md §4.2).
//!
//! `value` is protected entirely by `state`'s mutex; `down`/`timed_down`
//! loop over the predicate `value >= k` to tolerate spurious wakeups, never
//! trusting a single `Condvar::notify_one` to mean the predicate actually
//! holds.

use parking_lot::{Condvar, Mutex};
use threadkit_core::{Deadline, Error, Result};
use tracing::trace;

struct State {
    value: u64,
}

/// A counting semaphore with blocking and timed acquire/release.
///
/// The value can never go negative: `down(k)` blocks until at least `k`
/// units are available, then atomically removes them. `up(k)` adds units
/// and never blocks.
pub struct Semaphore {
    state: Mutex<State>,
    condvar: Condvar,
    max_value: u64,
}

impl Semaphore {
    /// Create a semaphore initialized to `max_value` available units.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `max_value == 0`.
    pub fn new(max_value: u64) -> Result<Self> {
        if max_value == 0 {
            return Err(Error::invalid_argument(
                "semaphore max_value must be positive",
            ));
        }
        Ok(Semaphore {
            state: Mutex::new(State { value: max_value }),
            condvar: Condvar::new(),
            max_value,
        })
    }

    /// The value the semaphore was constructed with.
    #[must_use]
    pub fn max_value(&self) -> u64 {
        self.max_value
    }

    /// The current number of available units. For diagnostics/tests only —
    /// the value may change the instant this returns.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.state.lock().value
    }

    /// Add `k` units and wake one waiter. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `k == 0`.
    pub fn up(&self, k: u64) -> Result<()> {
        if k == 0 {
            return Err(Error::invalid_argument("up() requires k >= 1"));
        }
        {
            let mut state = self.state.lock();
            state.value += k;
            trace!(added = k, value = state.value, "semaphore up");
        }
        self.condvar.notify_one();
        Ok(())
    }

    /// Block until at least `k` units are available, then remove them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `k == 0`.
    pub fn down(&self, k: u64) -> Result<()> {
        if k == 0 {
            return Err(Error::invalid_argument("down() requires k >= 1"));
        }
        let mut state = self.state.lock();
        while state.value < k {
            self.condvar.wait(&mut state);
        }
        state.value -= k;
        trace!(removed = k, value = state.value, "semaphore down");
        Ok(())
    }

    /// Apply a signed delta: positive calls [`Self::up`], negative calls
    /// [`Self::down`] with the absolute value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `delta == 0`.
    pub fn op(&self, delta: i64) -> Result<()> {
        match delta.cmp(&0) {
            std::cmp::Ordering::Greater => self.up(delta as u64),
            std::cmp::Ordering::Less => self.down(delta.unsigned_abs()),
            std::cmp::Ordering::Equal => {
                Err(Error::invalid_argument("op() requires a non-zero delta"))
            }
        }
    }

    /// `up` bounded by a deadline. `up` never actually blocks, so this only
    /// exists for API symmetry with `timed_down`/`timed_op`; it always
    /// completes immediately (or rejects `k == 0`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `k == 0`.
    pub fn timed_up(&self, k: u64, _timeout_ms: u64) -> Result<()> {
        self.up(k)
    }

    /// Block until at least `k` units are available or `timeout_ms`
    /// elapses, whichever comes first.
    ///
    /// The deadline is computed once from `timeout_ms`; every subsequent
    /// condition-variable wait is bounded by the *remaining* budget, so
    /// spurious wakeups never extend the overall wait past the deadline.
    /// On [`Error::Timeout`], no state has been mutated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `k == 0`, or [`Error::Timeout`]
    /// if the deadline elapses before `value >= k`.
    pub fn timed_down(&self, k: u64, timeout_ms: u64) -> Result<()> {
        if k == 0 {
            return Err(Error::invalid_argument("timed_down() requires k >= 1"));
        }
        let deadline = Deadline::after_ms(timeout_ms);
        let mut state = self.state.lock();
        while state.value < k {
            let remaining = deadline.remaining();
            if remaining.is_zero() {
                trace!(k, "semaphore timed_down timeout");
                return Err(Error::Timeout);
            }
            let timed_out = self.condvar.wait_for(&mut state, remaining).timed_out();
            if timed_out && state.value < k {
                trace!(k, "semaphore timed_down timeout");
                return Err(Error::Timeout);
            }
        }
        state.value -= k;
        trace!(removed = k, value = state.value, "semaphore timed_down");
        Ok(())
    }

    /// `timed_op` dispatches to [`Self::timed_up`] or [`Self::timed_down`]
    /// depending on the sign of `delta`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `delta == 0`, or
    /// [`Error::Timeout`] per [`Self::timed_down`].
    pub fn timed_op(&self, delta: i64, timeout_ms: u64) -> Result<()> {
        match delta.cmp(&0) {
            std::cmp::Ordering::Greater => self.timed_up(delta as u64, timeout_ms),
            std::cmp::Ordering::Less => self.timed_down(delta.unsigned_abs(), timeout_ms),
            std::cmp::Ordering::Equal => {
                Err(Error::invalid_argument("timed_op() requires a non-zero delta"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn rejects_non_positive_max_value() {
        assert!(Semaphore::new(0).is_err());
    }

    #[test]
    fn up_then_down_is_a_no_op_on_value() {
        let sem = Semaphore::new(1).unwrap();
        assert_eq!(sem.value(), 1);
        sem.up(1).unwrap();
        sem.down(2).unwrap();
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn down_rejects_zero() {
        let sem = Semaphore::new(1).unwrap();
        assert!(matches!(sem.down(0), Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn op_zero_is_an_error() {
        let sem = Semaphore::new(1).unwrap();
        assert!(sem.op(0).is_err());
    }

    // Scenario 1 from spec.md §8: init(1); down(1); up(1); up(1); down(2).
    #[test]
    fn semaphore_mem_scenario() {
        let sem = Semaphore::new(1).unwrap();
        sem.down(1).unwrap();
        sem.up(1).unwrap();
        sem.up(1).unwrap();
        sem.down(2).unwrap();
        assert_eq!(sem.value(), 0);
    }

    // Scenario 2 from spec.md §8, compressed to keep the suite fast.
    #[test]
    fn timed_op_scenario() {
        let sem = Semaphore::new(10).unwrap();
        assert!(sem.timed_op(-10, 1000).is_ok());
        assert_eq!(sem.timed_op(-2, 50), Err(Error::Timeout));
        assert_eq!(sem.timed_op(-2, 50), Err(Error::Timeout));
        sem.up(1).unwrap();
        sem.down(1).unwrap();
    }

    #[test]
    fn timed_down_does_not_mutate_state_on_timeout() {
        let sem = Semaphore::new(3).unwrap();
        sem.down(3).unwrap();
        assert_eq!(sem.timed_down(1, 10), Err(Error::Timeout));
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn timed_down_succeeds_once_another_thread_ups() {
        let sem = Arc::new(Semaphore::new(1).unwrap());
        sem.down(1).unwrap();

        let sem2 = Arc::clone(&sem);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            sem2.up(1).unwrap();
        });

        assert!(sem.timed_down(1, 2_000).is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn down_blocks_until_k_units_available() {
        let sem = Arc::new(Semaphore::new(2).unwrap());
        sem.down(2).unwrap();

        let sem2 = Arc::clone(&sem);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            sem2.up(2).unwrap();
        });

        // down(2) on an owner draining all capacity at once (the
        // shutdown-discipline rationale from spec.md §4.2).
        sem.down(2).unwrap();
        handle.join().unwrap();
    }
}
