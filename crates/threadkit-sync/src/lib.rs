//! Blocking/timed synchronization primitives: a counting semaphore, a
//! reader/writer lock, and a centralized barrier — the building blocks
//! everything else in the workspace is assembled from.

pub mod barrier;
pub mod rwlock;
pub mod semaphore;

pub use barrier::Barrier;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;
