//! Deadline arithmetic for every timed operation in the workspace.
//!
//! spec.md §4.1 requires that a relative millisecond timeout be converted to
//! an absolute deadline exactly once, and that the *remaining* budget be
//! re-derived on every subsequent wakeup so spurious wakeups never refresh
//! it. [`std::time::Instant`] already gives us a monotonic clock without the
//! seconds/sub-second-fraction bookkeeping the original C implementation had
//! to do by hand (`timespec` normalization); [`Deadline`] is a thin wrapper
//! around it that only exposes the two operations timed waits actually need.

use std::time::{Duration, Instant};

/// An absolute point in time derived once from a relative millisecond
/// timeout, then re-checked (never recomputed) on every wakeup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    /// Compute the deadline that is `ms` milliseconds from now.
    #[must_use]
    pub fn after_ms(ms: u64) -> Self {
        Deadline(Instant::now() + Duration::from_millis(ms))
    }

    /// Time remaining until this deadline, or `Duration::ZERO` if it has
    /// already passed. Never negative (that's the whole point of a
    /// monotonic deadline): a caller that only ever asks "how much budget is
    /// left" cannot observe the clock going backwards.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    /// `true` once [`Self::remaining`] would return zero.
    #[must_use]
    pub fn has_passed(&self) -> bool {
        Instant::now() >= self.0
    }
}

/// Milliseconds elapsed between two monotonic readings, never negative.
///
/// spec.md describes this as "borrow from the seconds field when the
/// sub-second field is smaller in `after`" — the `timespec` subtraction
/// trick the original C implementation needed. `Instant` has no exposed
/// seconds/nanoseconds fields to borrow between, so the equivalent is
/// simply a saturating subtraction: the result is clamped to zero rather
/// than underflowing if `after` is (incorrectly) earlier than `before`.
#[must_use]
pub fn elapsed_ms(after: Instant, before: Instant) -> u64 {
    after.saturating_duration_since(before).as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn deadline_remaining_shrinks_towards_zero() {
        let deadline = Deadline::after_ms(50);
        let first = deadline.remaining();
        thread::sleep(Duration::from_millis(10));
        let second = deadline.remaining();
        assert!(second <= first);
        assert!(!deadline.has_passed());
    }

    #[test]
    fn deadline_expires_after_budget() {
        let deadline = Deadline::after_ms(5);
        thread::sleep(Duration::from_millis(20));
        assert!(deadline.has_passed());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[test]
    fn elapsed_ms_never_underflows() {
        let earlier = Instant::now();
        let later = earlier + Duration::from_millis(30);
        assert_eq!(elapsed_ms(later, earlier), 30);
        // Reversed order must saturate to zero, not panic or wrap.
        assert_eq!(elapsed_ms(earlier, later), 0);
    }
}
