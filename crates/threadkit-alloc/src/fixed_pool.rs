//! A fixed-size memory pool with O(1) allocate/free over a single slab
//! (spec.md §4.4).
//!
//! # Handle-based ownership (re-architected from the original design)
//!
//! The original C implementation recovers a free block's owning pool by
//! reading a back-pointer word immediately before the user's address, then
//! dispatches a *pool-less* `free(addr)` function via that recovered
//! pointer. spec.md §9 flags this as a pattern that should not survive
//! translation into a language with real ownership types: instead of
//! reading adjacent memory to rediscover the owner, [`Allocation`] simply
//! *carries* an [`Arc`] back to its pool. `free` is therefore not a
//! standalone function at all — it is [`Allocation`]'s `Drop` impl (with an
//! explicit [`Allocation::free`] available for callers who want the return
//! to happen at a specific point rather than at scope exit).
//!
//! The slab layout still matches the spec conceptually: every slot is a
//! header word followed by `object_size` bytes. The header is repurposed
//! here to hold a *slot index* (rather than a raw pointer) linking to the
//! next free slot — an intrusive singly linked free list with a safer bit
//! pattern than a dangling-pointer-shaped integer, but the same O(1)
//! allocate/free and the same invariant: the free list never contains an
//! allocated slot.

use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use threadkit_core::{Error, Result};
use tracing::{error, trace};

use crate::protection::{mlock_region, munlock_region, Protection};

const HEADER_SIZE: usize = size_of::<usize>();
const FREE_LIST_NIL: usize = usize::MAX;

/// A fixed-size memory pool: every allocation is exactly `object_size`
/// bytes, and the pool holds at most `capacity` of them.
pub struct FixedPool {
    object_size: usize,
    capacity: usize,
    slot_stride: usize,
    // Header words (free-list links) are mutated only through `free_head`'s
    // accessor, which either locks (`Protected`) or trusts the single-thread
    // contract (`Unprotected`); the payload region of an allocated slot is
    // only ever touched through its `Allocation`. `UnsafeCell` documents
    // that this field is not accessed through plain shared-reference rules.
    slab: UnsafeCell<Box<[u8]>>,
    free_head: FreeHead,
    protection: Protection,
    creator_thread: ThreadId,
    outstanding: AtomicUsize,
}

/// The free-list head, stored either behind a mutex or bare, matching
/// [`Protection`].
enum FreeHead {
    Protected(Mutex<Option<usize>>),
    Unprotected(UnsafeCell<Option<usize>>),
}

impl FreeHead {
    fn new(protection: Protection, initial: Option<usize>) -> Self {
        match protection {
            Protection::Protected => FreeHead::Protected(Mutex::new(initial)),
            Protection::Unprotected => FreeHead::Unprotected(UnsafeCell::new(initial)),
        }
    }

    /// Run `f` against the free-list head.
    ///
    /// # Safety
    ///
    /// For the `Unprotected` variant, the caller must have already checked
    /// the single-thread contract (no other thread can be inside this
    /// method concurrently).
    fn with<R>(&self, f: impl FnOnce(&mut Option<usize>) -> R) -> R {
        match self {
            FreeHead::Protected(mutex) => f(&mut mutex.lock()),
            // SAFETY: `check_single_threaded_contract` gates every call site
            // that reaches here; only the creating thread ever dereferences
            // this cell, so `&mut` is exclusive in practice even though the
            // type system cannot see it.
            FreeHead::Unprotected(cell) => f(unsafe { &mut *cell.get() }),
        }
    }
}

// SAFETY: header-word access through `free_head` is either serialized by a
// mutex (`Protected`) or confined to a single thread by the `Unprotected`
// contract checked in `check_single_threaded_contract`; the `object_size`
// payload of an allocated slot is exclusively owned by its `Allocation`.
// `Unprotected` pools are `Sync` in name only — sharing one across threads
// without ever calling an API method from more than one thread is sound,
// but calling in from a second thread is a data race the type system does
// not prevent (see `Protection::Unprotected`'s docs).
unsafe impl Send for FixedPool {}
unsafe impl Sync for FixedPool {}

impl FixedPool {
    /// Allocate a fresh slab and build a pool over it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `object_size == 0` or
    /// `capacity == 0`.
    pub fn create(object_size: usize, capacity: usize, protection: Protection) -> Result<Arc<Self>> {
        if object_size == 0 {
            return Err(Error::invalid_argument("object_size must be positive"));
        }
        if capacity == 0 {
            return Err(Error::invalid_argument("capacity must be positive"));
        }
        let slot_stride = HEADER_SIZE + object_size;
        let slab_len = slot_stride
            .checked_mul(capacity)
            .ok_or_else(|| Error::invalid_argument("slab size overflows usize"))?;
        let slab = vec![0u8; slab_len].into_boxed_slice();
        Self::create_from_block(object_size, capacity, protection, slab)
    }

    /// Build a pool over a caller-provided slab instead of allocating one,
    /// enabling pool nesting (a variable pool handing a carved-out region
    /// to a fixed pool, for example).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `object_size == 0`,
    /// `capacity == 0`, or `slab` is smaller than
    /// `(object_size + size_of::<usize>()) * capacity`.
    pub fn create_from_block(
        object_size: usize,
        capacity: usize,
        protection: Protection,
        mut slab: Box<[u8]>,
    ) -> Result<Arc<Self>> {
        if object_size == 0 {
            return Err(Error::invalid_argument("object_size must be positive"));
        }
        if capacity == 0 {
            return Err(Error::invalid_argument("capacity must be positive"));
        }
        let slot_stride = HEADER_SIZE + object_size;
        let required = slot_stride
            .checked_mul(capacity)
            .ok_or_else(|| Error::invalid_argument("slab size overflows usize"))?;
        if slab.len() < required {
            return Err(Error::invalid_argument(
                "provided slab is smaller than object_size * capacity",
            ));
        }

        // Stitch the free list: slot i's header points at slot i + 1, the
        // last slot's header is the sentinel.
        for i in 0..capacity {
            let next = if i + 1 == capacity { FREE_LIST_NIL } else { i + 1 };
            write_header(&mut slab, slot_stride, i, next);
        }

        trace!(object_size, capacity, "fixed pool created");
        Ok(Arc::new(FixedPool {
            object_size,
            capacity,
            slot_stride,
            slab: UnsafeCell::new(slab),
            free_head: FreeHead::new(protection, Some(0)),
            protection,
            creator_thread: thread::current().id(),
            outstanding: AtomicUsize::new(0),
        }))
    }

    /// Base pointer and length of the backing slab.
    ///
    /// # Safety
    ///
    /// Callers must go through `free_head.with` before writing through the
    /// returned pointer to a header word, and must only read/write a
    /// slot's payload region while holding the corresponding `Allocation`.
    unsafe fn slab_raw(&self) -> (*mut u8, usize) {
        let slab = &mut *self.slab.get();
        (slab.as_mut_ptr(), slab.len())
    }

    /// Size, in bytes, of each object this pool hands out.
    #[must_use]
    pub fn object_size(&self) -> usize {
        self.object_size
    }

    /// Total number of slots this pool was created with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently on loan. Invariant (spec.md §8): this plus
    /// the free list's length always equals `capacity`.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    fn check_single_threaded_contract(&self) {
        debug_assert!(
            self.protection != Protection::Unprotected
                || thread::current().id() == self.creator_thread,
            "unprotected FixedPool accessed from a thread other than its creator"
        );
    }

    /// Allocate one object from the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`] if every slot is currently on loan.
    pub fn allocate(self: &Arc<Self>) -> Result<Allocation> {
        self.check_single_threaded_contract();

        let idx = self.free_head.with(|head| -> Result<usize> {
            let idx = head.ok_or_else(|| {
                error!(capacity = self.capacity, "fixed pool exhausted");
                Error::Exhausted
            })?;
            // SAFETY: `free_head.with` serializes (or, for `Unprotected`,
            // single-thread-confines) header-word access.
            let next = unsafe {
                let (base, len) = self.slab_raw();
                read_header(std::slice::from_raw_parts(base, len), self.slot_stride, idx)
            };
            *head = if next == FREE_LIST_NIL { None } else { Some(next) };
            Ok(idx)
        })?;

        self.outstanding.fetch_add(1, Ordering::Relaxed);

        // SAFETY: `idx < capacity` (it came off the free list, which is
        // built only from valid indices), so the offset below lies within
        // `slab`. The header word at this slot is no longer read by anyone
        // else until this slot is freed again under `free_head`'s lock, so
        // handing out a pointer past it to the caller is sound: the
        // payload region was never aliased by pool-internal bookkeeping.
        let ptr = unsafe {
            let (base, _) = self.slab_raw();
            NonNull::new_unchecked(base.add(idx * self.slot_stride + HEADER_SIZE))
        };

        trace!(idx, outstanding = self.outstanding(), "fixed pool allocate");
        Ok(Allocation {
            pool: Arc::clone(self),
            slot_index: idx,
            ptr,
            len: self.object_size,
        })
    }

    fn release(&self, slot_index: usize) {
        self.check_single_threaded_contract();
        self.free_head.with(|head| {
            let next = head.unwrap_or(FREE_LIST_NIL);
            // SAFETY: slot_index was handed out by `allocate` and is
            // therefore `< capacity`, and the payload bytes are no longer
            // referenced by the caller (this only runs from
            // `Allocation::drop`/`free`, which consume the handle).
            // `free_head.with` serializes header writes against
            // `allocate`'s header read.
            unsafe {
                let (base, len) = self.slab_raw();
                write_header(std::slice::from_raw_parts_mut(base, len), self.slot_stride, slot_index, next);
            }
            *head = Some(slot_index);
        });
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        trace!(slot_index, outstanding = self.outstanding(), "fixed pool release");
    }

    /// Lock the pool's backing pages into physical memory. Best-effort and
    /// silently succeeds on platforms without `mlock`.
    pub fn pin(&self) {
        let (base, len) = unsafe { self.slab_raw() };
        unsafe { mlock_region(base, len) };
    }

    /// Unlock the pool's backing pages. Best-effort and silently succeeds
    /// on platforms without `munlock`.
    pub fn unpin(&self) {
        let (base, len) = unsafe { self.slab_raw() };
        unsafe { munlock_region(base, len) };
    }
}

fn write_header(slab: &mut [u8], slot_stride: usize, idx: usize, next: usize) {
    let offset = idx * slot_stride;
    slab[offset..offset + HEADER_SIZE].copy_from_slice(&next.to_ne_bytes());
}

fn read_header(slab: &[u8], slot_stride: usize, idx: usize) -> usize {
    let offset = idx * slot_stride;
    let mut bytes = [0u8; HEADER_SIZE];
    bytes.copy_from_slice(&slab[offset..offset + HEADER_SIZE]);
    usize::from_ne_bytes(bytes)
}

/// An object on loan from a [`FixedPool`].
///
/// Returned to the pool automatically when dropped; call [`Self::free`] to
/// return it at a specific point instead of at scope exit.
pub struct Allocation {
    pool: Arc<FixedPool>,
    slot_index: usize,
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the byte payload has no interior pointers of its own, and every
// access to it is mediated by an exclusively-held `Allocation`.
unsafe impl Send for Allocation {}

impl Allocation {
    /// The object's bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `len` bytes for the lifetime of this
        // `Allocation` (see `FixedPool::allocate`).
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The object's bytes, mutably.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Return this allocation to its pool now, rather than at scope exit.
    pub fn free(self) {
        drop(self);
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.pool.release(self.slot_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_object_size_or_capacity() {
        assert!(FixedPool::create(0, 4, Protection::Protected).is_err());
        assert!(FixedPool::create(8, 0, Protection::Protected).is_err());
    }

    // Scenario 3 from spec.md §8.
    #[test]
    fn fixed_pool_exhaustion_scenario() {
        let pool = FixedPool::create(64, 2, Protection::Protected).unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert!(pool.allocate().is_err());

        drop(a);
        drop(b);

        let a2 = pool.allocate().unwrap();
        let b2 = pool.allocate().unwrap();
        assert!(pool.allocate().is_err());
        drop(a2);
        drop(b2);
    }

    #[test]
    fn allocated_plus_free_equals_capacity() {
        let pool = FixedPool::create(16, 4, Protection::Protected).unwrap();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_eq!(pool.outstanding(), 2);
        drop(a);
        assert_eq!(pool.outstanding(), 1);
        drop(b);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn allocation_is_readable_and_writable() {
        let pool = FixedPool::create(8, 1, Protection::Protected).unwrap();
        let mut a = pool.allocate().unwrap();
        a.as_mut_slice().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(a.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn capacity_interleaved_cycles_leave_pool_usable() {
        let pool = FixedPool::create(32, 8, Protection::Protected).unwrap();
        for _ in 0..8 {
            let allocations: Vec<_> = (0..8).map(|_| pool.allocate().unwrap()).collect();
            assert!(pool.allocate().is_err());
            drop(allocations);
            assert_eq!(pool.outstanding(), 0);
        }
    }

    #[test]
    fn create_from_block_rejects_undersized_slab() {
        let slab = vec![0u8; 4].into_boxed_slice();
        assert!(FixedPool::create_from_block(8, 2, Protection::Protected, slab).is_err());
    }

    #[test]
    fn pin_and_unpin_do_not_panic() {
        let pool = FixedPool::create(16, 2, Protection::Protected).unwrap();
        pool.pin();
        pool.unpin();
    }
}
