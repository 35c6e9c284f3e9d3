//! A bounded producer/consumer queue built from two [`Semaphore`]s guarding
//! capacity and occupancy, a mutex-protected link structure, and a
//! [`FixedPool`] supplying node storage (spec.md §4.7).
//!
//! FIFO ordering is strict: all link manipulation happens under one mutex,
//! so the sequence of successful `items_avail.up()` calls is totally
//! ordered, and each producer's insertion happens-before its own `up` while
//! each consumer's `down` happens-before its own removal.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use threadkit_alloc::{FixedPool, Protection};
use threadkit_core::{Error, Result};
use threadkit_sync::Semaphore;
use tracing::trace;

/// A node slot's payload is unused: the pool exists purely to bound the
/// number of concurrently outstanding nodes at `capacity`, the same way
/// the original's node storage does, while the queued value itself lives
/// in `link` (a `T` with a destructor or non-`Copy` layout cannot be
/// safely punned through a raw byte slab the way the source's untyped
/// payload can).
const NODE_SLOT_SIZE: usize = 1;

/// A bounded FIFO queue.
pub struct Queue<T> {
    capacity: usize,
    space_avail: Semaphore,
    items_avail: Semaphore,
    node_pool: Arc<FixedPool>,
    link: Mutex<VecDeque<T>>,
}

impl<T: Send> Queue<T> {
    /// Create a queue that holds at most `capacity` items.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `capacity == 0`.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid_argument("queue capacity must be positive"));
        }
        let node_pool = FixedPool::create(NODE_SLOT_SIZE, capacity, Protection::Protected)?;
        // items_avail starts at 0 (nothing queued yet) but must share
        // max_value == capacity with space_avail so the quiescent-point
        // invariant `space_avail + items_avail == capacity` (spec.md §8)
        // can be checked at any time.
        let items_avail = Semaphore::new(capacity as u64)?;
        items_avail.down(capacity as u64)?;
        Ok(Queue {
            capacity,
            space_avail: Semaphore::new(capacity as u64)?,
            items_avail,
            node_pool,
            link: Mutex::new(VecDeque::with_capacity(capacity)),
        })
    }

    /// The capacity this queue was created with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The sum `space_avail + items_avail`; always equal to `capacity` at
    /// any quiescent point (spec.md §8).
    #[must_use]
    pub fn space_plus_items(&self) -> u64 {
        self.space_avail.value() + self.items_avail.value()
    }

    /// Push `item` onto the tail, blocking until a slot is free.
    pub fn enqueue(&self, item: T) -> Result<()> {
        self.space_avail.down(1)?;
        let allocation = self.node_pool.allocate()?;
        {
            let mut link = self.link.lock();
            link.push_back(item);
            trace!(len = link.len(), "queue enqueue");
        }
        allocation.free();
        self.items_avail.up(1)
    }

    /// Push `item` onto the tail, blocking until a slot is free or
    /// `timeout_ms` elapses. Per spec.md §4.7/§9, the timeout is applied
    /// only to the capacity-semaphore wait; once that succeeds the
    /// remaining steps are unbounded, matching the source's documented
    /// "loose" timeout contract exactly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no slot frees up in time.
    pub fn timed_enqueue(&self, item: T, timeout_ms: u64) -> Result<()> {
        self.space_avail.timed_down(1, timeout_ms)?;
        let allocation = self.node_pool.allocate()?;
        {
            let mut link = self.link.lock();
            link.push_back(item);
        }
        allocation.free();
        self.items_avail.up(1)
    }

    /// Pop the head item, blocking until one is available.
    pub fn dequeue(&self) -> Result<T> {
        self.items_avail.down(1)?;
        let allocation = self.node_pool.allocate()?;
        let item = {
            let mut link = self.link.lock();
            let item = link.pop_front().expect(
                "an items_avail permit implies at least one queued item under the link mutex",
            );
            trace!(len = link.len(), "queue dequeue");
            item
        };
        allocation.free();
        self.space_avail.up(1)?;
        Ok(item)
    }

    /// Pop the head item, blocking until one is available or `timeout_ms`
    /// elapses. See [`Self::timed_enqueue`] for the timeout contract.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no item arrives in time.
    pub fn timed_dequeue(&self, timeout_ms: u64) -> Result<T> {
        self.items_avail.timed_down(1, timeout_ms)?;
        let allocation = self.node_pool.allocate()?;
        let item = {
            let mut link = self.link.lock();
            link.pop_front().expect(
                "an items_avail permit implies at least one queued item under the link mutex",
            )
        };
        allocation.free();
        self.space_avail.up(1)?;
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn rejects_zero_capacity() {
        assert!(Queue::<u32>::new(0).is_err());
    }

    // Scenario 5 from spec.md §8.
    #[test]
    fn fifo_and_capacity_scenario() {
        let q = Queue::new(3).unwrap();
        q.enqueue(1).unwrap();
        q.enqueue(2).unwrap();
        q.enqueue(3).unwrap();
        assert_eq!(q.dequeue().unwrap(), 1);
        assert_eq!(q.dequeue().unwrap(), 2);
        q.enqueue(4).unwrap();
        q.enqueue(5).unwrap();
        assert_eq!(q.dequeue().unwrap(), 3);
        assert_eq!(q.dequeue().unwrap(), 4);
        assert_eq!(q.dequeue().unwrap(), 5);
        assert_eq!(q.space_plus_items(), 3);
    }

    #[test]
    fn capacity_one_blocks_second_enqueue_without_a_dequeue() {
        let q = Arc::new(Queue::new(1).unwrap());
        q.enqueue(1).unwrap();
        assert_eq!(q.timed_enqueue(2, 20), Err(Error::Timeout));
    }

    #[test]
    fn dequeue_blocks_until_a_producer_enqueues() {
        let q = Arc::new(Queue::new(1).unwrap());
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            q2.enqueue(42).unwrap();
        });
        assert_eq!(q.dequeue().unwrap(), 42);
        handle.join().unwrap();
    }

    #[test]
    fn fifo_order_holds_under_concurrent_producers() {
        let q = Arc::new(Queue::new(4).unwrap());
        let producers: Vec<_> = (0..4)
            .map(|i| {
                let q = Arc::clone(&q);
                thread::spawn(move || q.enqueue(i).unwrap())
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        let mut drained: Vec<_> = (0..4).map(|_| q.dequeue().unwrap()).collect();
        drained.sort_unstable();
        assert_eq!(drained, vec![0, 1, 2, 3]);
    }
}
