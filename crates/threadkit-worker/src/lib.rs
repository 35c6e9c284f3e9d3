//! A fixed or elastic pool of worker threads dispatching user callbacks
//! behind one-shot futures (spec.md §4.8).
//!
//! Each worker is a loop blocked on its own `workAvailable` semaphore; the
//! pool tracks which workers are idle in a mutex-guarded slot table and a
//! counting `freeWorkers` semaphore so `submit` can wait for — and, for an
//! elastic pool, lazily grow into — an idle worker rather than polling.
//!
//! # Back-reference (re-architected from the original design)
//!
//! The original has each worker thread hold a raw pointer back to its
//! parent pool. Since the pool strictly outlives every worker it spawns
//! (workers only read the pool during their own lifetime, which `shutdown`
//! bounds), that back-reference is modeled here as a non-owning
//! [`std::sync::Weak`] rather than a strong [`Arc`] — a worker thread that
//! outlives its pool (which `shutdown` prevents, but a leaked thread
//! should not be able to resurrect) simply observes `upgrade()` fail and
//! exits instead of keeping the pool's state alive forever.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use threadkit_core::{Error, Result};
use threadkit_sync::Semaphore;
use tracing::{error, trace, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Whether a pool's thread count is fixed at construction or may grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// Exactly `min_threads == max_threads` workers, created up front.
    Fixed,
    /// `min_threads` workers up front, growing on demand up to `max_threads`.
    Elastic,
}

struct WorkerSlot {
    work_available: Semaphore,
    work_item: Mutex<Option<Job>>,
}

struct SlotEntry {
    slot: Arc<WorkerSlot>,
    available: bool,
}

struct PoolInner {
    kind: PoolKind,
    max_threads: usize,
    slots: Mutex<Vec<SlotEntry>>,
    free_workers: Semaphore,
    join_handles: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

/// A pool of worker threads consuming submitted callbacks.
///
/// Cheaply `Clone`-able (an `Arc` handle internally); every clone shares
/// the same workers, and [`Self::shutdown`] affects all of them.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

/// A one-shot handle to a callback's eventual result.
///
/// Built from a semaphore initialized to 0: exactly one worker thread will
/// signal it (after running the callback), and [`Self::join`] is meant to
/// be called exactly once.
pub struct Future<R> {
    inner: Arc<FutureInner<R>>,
}

struct FutureInner<R> {
    result_avail: Semaphore,
    result: Mutex<Option<R>>,
}

impl<R> Future<R> {
    /// Block until the worker has produced a result, then return it.
    ///
    /// # Errors
    ///
    /// Propagates a [`Error::SystemError`] if the internal semaphore wait
    /// fails; under normal operation this always succeeds once the worker
    /// has run.
    pub fn join(self) -> Result<R> {
        self.inner.result_avail.down(1)?;
        Ok(self
            .inner
            .result
            .lock()
            .take()
            .expect("a result_avail permit implies a stored result"))
    }
}

impl WorkerPool {
    /// Create a pool with `min_threads..=max_threads` workers.
    ///
    /// `min_threads` workers are spawned immediately. For [`PoolKind::Fixed`]
    /// pools, `min_threads` must equal `max_threads`. For
    /// [`PoolKind::Elastic`] pools, additional workers (up to `max_threads`)
    /// are spawned lazily by [`Self::submit`] as demand requires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `min_threads == 0`,
    /// `min_threads > max_threads`, or (`Fixed`) `min_threads != max_threads`.
    pub fn new(min_threads: usize, max_threads: usize, kind: PoolKind) -> Result<Self> {
        if min_threads == 0 {
            return Err(Error::invalid_argument("min_threads must be positive"));
        }
        if min_threads > max_threads {
            return Err(Error::invalid_argument("min_threads must be <= max_threads"));
        }
        if kind == PoolKind::Fixed && min_threads != max_threads {
            return Err(Error::invalid_argument(
                "a fixed pool requires min_threads == max_threads",
            ));
        }

        let inner = Arc::new(PoolInner {
            kind,
            max_threads,
            slots: Mutex::new(Vec::with_capacity(max_threads)),
            free_workers: Semaphore::new(max_threads as u64)?,
            join_handles: Mutex::new(Vec::with_capacity(max_threads)),
            shut_down: AtomicBool::new(false),
        });

        let pool = WorkerPool { inner };
        for _ in 0..min_threads {
            pool.spawn_worker()?;
        }
        trace!(min_threads, max_threads, ?kind, "worker pool created");
        Ok(pool)
    }

    fn spawn_worker(&self) -> Result<usize> {
        let work_available = Semaphore::new(1)?;
        work_available.down(1)?; // start at 0: idle until work is assigned
        let slot = Arc::new(WorkerSlot {
            work_available,
            work_item: Mutex::new(None),
        });

        let idx = {
            let mut slots = self.inner.slots.lock();
            slots.push(SlotEntry {
                slot: Arc::clone(&slot),
                available: true,
            });
            slots.len() - 1
        };

        let weak_pool = Arc::downgrade(&self.inner);
        let handle = thread::Builder::new()
            .name(format!("threadkit-worker-{idx}"))
            .spawn(move || worker_loop(weak_pool, idx, slot))
            .map_err(|e| Error::system(format!("failed to spawn worker thread: {e}")))?;
        self.inner.join_handles.lock().push(handle);
        Ok(idx)
    }

    /// Submit a callback for execution by the next available worker,
    /// returning a [`Future`] that resolves to its return value.
    ///
    /// Blocks until a worker is idle — or, for an elastic pool below
    /// `max_threads`, until a fresh worker can be spawned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SystemError`] if a new worker thread needed to be
    /// spawned and spawning it failed.
    pub fn submit<F, R>(&self, job: F) -> Result<Future<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let future_inner = Arc::new(FutureInner {
            result_avail: Semaphore::new(1)?,
            result: Mutex::new(None),
        });
        future_inner.result_avail.down(1)?; // start at 0: not yet available

        let signal = Arc::clone(&future_inner);
        let boxed: Job = Box::new(move || {
            let result = job();
            *signal.result.lock() = Some(result);
            if let Err(e) = signal.result_avail.up(1) {
                error!(error = ?e, "worker failed to signal future completion");
            }
        });

        self.inner.free_workers.down(1)?;

        let idx = {
            let mut slots = self.inner.slots.lock();
            if let Some(pos) = slots.iter().position(|s| s.available) {
                slots[pos].available = false;
                pos
            } else if self.inner.kind == PoolKind::Elastic && slots.len() < self.inner.max_threads {
                drop(slots);
                let idx = self.spawn_worker()?;
                self.inner.slots.lock()[idx].available = false;
                idx
            } else {
                // `free_workers` bounds concurrent submissions at
                // `max_threads`, so every permit corresponds to either an
                // idle worker or elastic headroom; this should be
                // unreachable, but a pool racing a concurrent `shutdown`
                // could observe no slot at all.
                warn!("submit found no available worker despite a free_workers permit");
                return Err(Error::Exhausted);
            }
        };

        let slot = Arc::clone(&self.inner.slots.lock()[idx].slot);
        *slot.work_item.lock() = Some(boxed);
        slot.work_available.up(1)?;

        Ok(Future {
            inner: future_inner,
        })
    }

    /// Shut down the pool: wait for every in-flight callback to finish,
    /// signal every worker to exit, and join their threads.
    ///
    /// Idempotent: a second call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SystemError`] if a worker thread panicked.
    pub fn shutdown(&self) -> Result<()> {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Drain `max_threads` permits: this blocks until every currently
        // busy worker finishes (each finish ups one permit back) and
        // consumes any headroom permits for workers never spawned, while
        // preventing `submit` from handing out new work afterward.
        for _ in 0..self.inner.max_threads {
            self.inner.free_workers.down(1)?;
        }

        let slots: Vec<Arc<WorkerSlot>> = self
            .inner
            .slots
            .lock()
            .iter()
            .map(|entry| Arc::clone(&entry.slot))
            .collect();
        for slot in slots {
            *slot.work_item.lock() = None;
            slot.work_available.up(1)?;
        }

        let handles: Vec<JoinHandle<()>> = self.inner.join_handles.lock().drain(..).collect();
        for handle in handles {
            handle
                .join()
                .map_err(|_| Error::system("worker thread panicked"))?;
        }
        trace!("worker pool shut down");
        Ok(())
    }
}

fn worker_loop(pool: Weak<PoolInner>, idx: usize, slot: Arc<WorkerSlot>) {
    loop {
        if slot.work_available.down(1).is_err() {
            return;
        }
        let job = slot.work_item.lock().take();
        let Some(job) = job else {
            // Sentinel shutdown signal: `workItem == None` with a permit.
            return;
        };
        job();

        let Some(pool) = pool.upgrade() else {
            return;
        };
        {
            let mut slots = pool.slots.lock();
            if let Some(entry) = slots.get_mut(idx) {
                entry.available = true;
            }
        }
        if let Err(e) = pool.free_workers.up(1) {
            error!(error = ?e, "worker failed to signal free_workers");
            return;
        }
    }
}
