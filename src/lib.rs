//! # threadkit
//!
//! A companion toolkit of general-purpose concurrency and memory
//! primitives meant to supplement a platform thread library: a blocking
//! counting semaphore, a reader/writer lock, a centralized barrier,
//! fixed-size and variable-size memory pools, a bounded producer/consumer
//! queue, and a worker-thread pool with one-shot futures.
//!
//! ## Crate Structure
//!
//! The workspace is split by concern, each published separately so a
//! caller who only needs, say, the memory pools does not have to pull in
//! the worker pool's dependencies:
//!
//! - **[`threadkit_core`]**: the error taxonomy and deadline/elapsed-time
//!   arithmetic every other crate is built from.
//! - **[`threadkit_sync`]**: [`Semaphore`], [`RwLock`], and [`Barrier`].
//! - **[`threadkit_alloc`]**: [`FixedPool`] (O(1) allocate/free) and
//!   [`VariablePool`] (first-fit with coalescing).
//! - **[`threadkit_queue`]**: [`Queue`], a bounded FIFO built from a pair
//!   of semaphores and a fixed pool.
//! - **[`threadkit_worker`]**: [`WorkerPool`] and [`Future`], a fixed or
//!   elastic pool of worker threads dispatching callbacks.
//!
//! This crate re-exports the common types from each so most callers only
//! need `use threadkit::prelude::*;` or a handful of named imports from
//! the root.

pub use threadkit_alloc::{Allocation, FixedPool, Protection, VariableAllocation, VariablePool};
pub use threadkit_core::{Deadline, Error, Result};
pub use threadkit_queue::Queue;
pub use threadkit_sync::{Barrier, RwLock, Semaphore};
pub use threadkit_worker::{Future, PoolKind, WorkerPool};

/// Everything a caller wiring together more than one layer typically
/// needs, in one `use`.
pub mod prelude {
    pub use crate::{
        Allocation, Barrier, Deadline, Error, FixedPool, Future, PoolKind, Protection, Queue,
        Result, RwLock, Semaphore, VariableAllocation, VariablePool, WorkerPool,
    };
}
