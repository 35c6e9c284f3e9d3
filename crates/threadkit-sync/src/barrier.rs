//! A centralized, sense-reversing barrier (spec.md §4.6).
//!
//! Re-usable across arbitrarily many rounds: each round flips a boolean
//! "sense" flag exactly once, under the barrier's mutex, so waiters can
//! detect their round has completed without a separate reset step racing
//! the next round's arrivals.

use parking_lot::{Condvar, Mutex};
use threadkit_core::{Error, Result};
use tracing::trace;

struct State {
    num_arrived: usize,
    sense: bool,
}

/// A barrier that rendezvous a fixed number of participants, once per
/// round, indefinitely.
pub struct Barrier {
    num_waiters: usize,
    state: Mutex<State>,
    condvar: Condvar,
}

impl Barrier {
    /// Create a barrier for exactly `num_waiters` participants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `num_waiters == 0`.
    pub fn new(num_waiters: usize) -> Result<Self> {
        if num_waiters == 0 {
            return Err(Error::invalid_argument("barrier num_waiters must be positive"));
        }
        Ok(Barrier {
            num_waiters,
            state: Mutex::new(State {
                num_arrived: 0,
                sense: false,
            }),
            condvar: Condvar::new(),
        })
    }

    /// The number of participants this barrier rendezvous per round.
    #[must_use]
    pub fn num_waiters(&self) -> usize {
        self.num_waiters
    }

    /// Arrive at the barrier and block until every other participant has
    /// also arrived for this round.
    ///
    /// The last arrival resets the counter, flips the sense flag, and wakes
    /// every other waiter — all under the same mutex acquisition, so every
    /// released waiter observes a consistent flipped sense rather than a
    /// torn read.
    pub fn sync(&self) {
        let mut state = self.state.lock();
        let local_sense = state.sense;
        state.num_arrived += 1;

        if state.num_arrived == self.num_waiters {
            state.num_arrived = 0;
            state.sense = !state.sense;
            trace!(num_waiters = self.num_waiters, "barrier round complete");
            self.condvar.notify_all();
        } else {
            while state.sense == local_sense {
                self.condvar.wait(&mut state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rejects_zero_waiters() {
        assert!(Barrier::new(0).is_err());
    }

    #[test]
    fn single_participant_never_blocks() {
        let barrier = Barrier::new(1).unwrap();
        barrier.sync();
        barrier.sync();
    }

    // Scenario 6 from spec.md §8: 4 threads, 128 rounds, each round appends
    // (round, tid) to a shared log before syncing. Once sorted per round,
    // every round's stride of 4 entries must be that round's index 4 times.
    #[test]
    fn four_threads_rendezvous_across_many_rounds() {
        const THREADS: usize = 4;
        const ROUNDS: usize = 128;

        let barrier = Arc::new(Barrier::new(THREADS).unwrap());
        let log = Arc::new(PlMutex::new(Vec::<(usize, usize)>::new()));

        let handles: Vec<_> = (0..THREADS)
            .map(|tid| {
                let barrier = Arc::clone(&barrier);
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for round in 0..ROUNDS {
                        log.lock().push((round, tid));
                        barrier.sync();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let mut entries = log.lock().clone();
        assert_eq!(entries.len(), THREADS * ROUNDS);
        entries.sort_unstable();

        let mut expected = Vec::with_capacity(THREADS * ROUNDS);
        for round in 0..ROUNDS {
            for tid in 0..THREADS {
                expected.push((round, tid));
            }
        }
        assert_eq!(entries, expected);
    }
}
