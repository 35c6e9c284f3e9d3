//! A variable-size memory pool: first-fit allocation with a split policy,
//! coalescing on free (spec.md §4.5).
//!
//! # Free-list representation (re-architected from the original design)
//!
//! The original C implementation threads the free list intrusively through
//! the pool's own bytes (`{size, prev, next}` written into the first three
//! words of every free block), and recovers an allocated block's boundary
//! by reading an `{ownerPool, size}` header from the two words immediately
//! before the user's address. That scheme exists because the C API has no
//! way to hand the caller anything but a raw pointer.
//!
//! Here the free list lives beside the slab, as an ordinary
//! [`std::collections::BTreeMap`] keyed by start offset — `BTreeMap`
//! already keeps entries in address order, which is exactly the invariant
//! the original's hand-rolled doubly linked list existed to maintain. A
//! `Protected` pool guards the map with a mutex; an `Unprotected` one
//! stores it behind a bare `UnsafeCell`, trusting the single-thread
//! contract instead of locking (see [`crate::protection::Protection`]).
//! [`VariableAllocation`] carries its block's offset and length directly
//! (the same handle-based redesign used by [`crate::fixed_pool`]), so
//! `free` never needs to recover anything by reading memory adjacent to
//! the user's address — which also resolves the open question in the
//! design notes about reconstructing a split's boundary from a recovered
//! `size` alone: there is nothing to reconstruct, because nothing is lost.

use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::collections::BTreeMap;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use threadkit_core::{Error, Result};
use tracing::{error, trace};

use crate::protection::{mlock_region, munlock_region, Protection};

const WORD: usize = size_of::<usize>();
/// A split that would leave less than this many bytes behind is not worth
/// it: consume the whole block instead (spec.md §4.5 split policy).
const MIN_SPLIT: usize = 4 * WORD;

/// A variable-size memory pool over a single contiguous region, allocating
/// by first-fit and coalescing adjacent free blocks on every free.
pub struct VariablePool {
    total_size: usize,
    slab: UnsafeCell<Box<[u8]>>,
    // offset -> block length, in address order; no two entries are adjacent.
    free: FreeList,
    protection: Protection,
    creator_thread: ThreadId,
    outstanding_bytes: AtomicUsize,
}

/// The free list, stored either behind a mutex or bare, matching
/// [`Protection`].
enum FreeList {
    Protected(Mutex<BTreeMap<usize, usize>>),
    Unprotected(UnsafeCell<BTreeMap<usize, usize>>),
}

impl FreeList {
    fn new(protection: Protection, initial: BTreeMap<usize, usize>) -> Self {
        match protection {
            Protection::Protected => FreeList::Protected(Mutex::new(initial)),
            Protection::Unprotected => FreeList::Unprotected(UnsafeCell::new(initial)),
        }
    }

    /// Run `f` against the free list.
    ///
    /// # Safety
    ///
    /// For the `Unprotected` variant, the caller must have already checked
    /// the single-thread contract.
    fn with<R>(&self, f: impl FnOnce(&mut BTreeMap<usize, usize>) -> R) -> R {
        match self {
            FreeList::Protected(mutex) => f(&mut mutex.lock()),
            // SAFETY: `check_single_threaded_contract` gates every call site
            // that reaches here.
            FreeList::Unprotected(cell) => f(unsafe { &mut *cell.get() }),
        }
    }
}

// SAFETY: access to `free`'s map is either mediated by its mutex
// (`Protected`) or confined to a single thread by the `Unprotected`
// contract checked in `check_single_threaded_contract`; `slab` access
// beyond that is exclusively owned by a live `VariableAllocation`. As with
// `FixedPool`, an `Unprotected` pool is `Sync` in name only — see
// `Protection::Unprotected`'s docs.
unsafe impl Send for VariablePool {}
unsafe impl Sync for VariablePool {}

impl VariablePool {
    /// Allocate a fresh region of `total_size` bytes and manage it as one
    /// large free block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `total_size == 0`.
    pub fn create(total_size: usize, protection: Protection) -> Result<Arc<Self>> {
        if total_size == 0 {
            return Err(Error::invalid_argument("total_size must be positive"));
        }
        let slab = vec![0u8; total_size].into_boxed_slice();
        let mut initial = BTreeMap::new();
        initial.insert(0, total_size);
        trace!(total_size, "variable pool created");
        Ok(Arc::new(VariablePool {
            total_size,
            slab: UnsafeCell::new(slab),
            free: FreeList::new(protection, initial),
            protection,
            creator_thread: thread::current().id(),
            outstanding_bytes: AtomicUsize::new(0),
        }))
    }

    /// Safety: see [`crate::fixed_pool::FixedPool::slab_raw`]'s analogue —
    /// callers must go through `free.with` before touching block
    /// boundaries, and must only read/write a block's payload through its
    /// `VariableAllocation`.
    unsafe fn slab_raw(&self) -> (*mut u8, usize) {
        let slab = &mut *self.slab.get();
        (slab.as_mut_ptr(), slab.len())
    }

    /// Total size, in bytes, of the region this pool manages.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Bytes currently on loan across all outstanding allocations.
    #[must_use]
    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding_bytes.load(Ordering::Relaxed)
    }

    /// Bytes currently held in free blocks. Invariant (spec.md §8):
    /// `outstanding_bytes() + free_bytes() == total_size()`.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.free.with(|free| free.values().sum())
    }

    fn check_single_threaded_contract(&self) {
        debug_assert!(
            self.protection != Protection::Unprotected
                || thread::current().id() == self.creator_thread,
            "unprotected VariablePool accessed from a thread other than its creator"
        );
    }

    /// Allocate `n` bytes from the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `n == 0`, or [`Error::Exhausted`]
    /// if no free block is large enough.
    pub fn allocate(self: &Arc<Self>, n: usize) -> Result<VariableAllocation> {
        if n == 0 {
            return Err(Error::invalid_argument("allocation size must be positive"));
        }
        self.check_single_threaded_contract();

        let (alloc_offset, alloc_len) = self.free.with(|free| -> Result<(usize, usize)> {
            let candidate = free
                .iter()
                .find(|(_, &size)| size >= n)
                .map(|(&offset, &size)| (offset, size));

            let Some((offset, size)) = candidate else {
                error!(n, total_size = self.total_size, "variable pool exhausted");
                return Err(Error::Exhausted);
            };

            let remainder = size - n;
            Ok(if remainder < MIN_SPLIT {
                // Consume the whole block: the remainder is too small to be
                // usable as a free block of its own.
                free.remove(&offset);
                (offset, size)
            } else {
                // Split policy: carve the allocation from the high end,
                // leave the shrunk low remainder on the list at the same
                // address.
                free.insert(offset, remainder);
                (offset + remainder, n)
            })
        })?;

        self.outstanding_bytes.fetch_add(alloc_len, Ordering::Relaxed);

        // SAFETY: `alloc_offset + alloc_len <= total_size` by construction
        // above, and the region is no longer reachable through `free` until
        // this allocation is returned.
        let ptr = unsafe {
            let (base, _) = self.slab_raw();
            NonNull::new_unchecked(base.add(alloc_offset))
        };

        trace!(
            alloc_offset,
            alloc_len,
            outstanding = self.outstanding_bytes(),
            "variable pool allocate"
        );
        Ok(VariableAllocation {
            pool: Arc::clone(self),
            offset: alloc_offset,
            block_len: alloc_len,
            user_len: n,
            ptr,
        })
    }

    fn release(&self, offset: usize, block_len: usize) {
        self.check_single_threaded_contract();
        self.free.with(|free| insert_coalesced(free, offset, block_len));
        self.outstanding_bytes.fetch_sub(block_len, Ordering::Relaxed);
        trace!(offset, block_len, outstanding = self.outstanding_bytes(), "variable pool release");
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

/// Insert a freshly freed `(offset, size)` block into `free`, merging with
/// an abutting successor and then an abutting predecessor (spec.md §4.5
/// step 3: coalesce with successor, then with predecessor).
fn insert_coalesced(free: &mut BTreeMap<usize, usize>, mut offset: usize, mut size: usize) {
    if let Some(next_size) = free.remove(&(offset + size)) {
        size += next_size;
    }
    if let Some((&prev_offset, &prev_size)) = free.range(..offset).next_back() {
        if prev_offset + prev_size == offset {
            free.remove(&prev_offset);
            offset = prev_offset;
            size += prev_size;
        }
    }
    free.insert(offset, size);
}

/// A region on loan from a [`VariablePool`].
///
/// Returned to the pool automatically when dropped; call [`Self::free`] to
/// return it at a specific point instead of at scope exit.
pub struct VariableAllocation {
    pool: Arc<VariablePool>,
    offset: usize,
    block_len: usize,
    user_len: usize,
    ptr: NonNull<u8>,
}

// SAFETY: as `fixed_pool::Allocation` — the byte payload has no interior
// pointers, and access is mediated by exclusive ownership of the handle.
unsafe impl Send for VariableAllocation {}

impl VariableAllocation {
    /// The allocation's bytes (exactly the `n` bytes requested; the block
    /// backing it may be larger due to the split policy's minimum remainder).
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: see `FixedPool::allocate`; `ptr` is valid for `user_len`
        // bytes for the lifetime of this allocation.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.user_len) }
    }

    /// The allocation's bytes, mutably.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.user_len) }
    }

    /// Return this allocation to its pool now, rather than at scope exit.
    pub fn free(self) {
        drop(self);
    }
}

impl Drop for VariableAllocation {
    fn drop(&mut self) {
        self.pool.release(self.offset, self.block_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_total_size_or_zero_request() {
        assert!(VariablePool::create(0, Protection::Protected).is_err());
        let pool = VariablePool::create(64, Protection::Protected).unwrap();
        assert!(pool.allocate(0).is_err());
    }

    // Scenario 4 from spec.md §8.
    #[test]
    fn variable_pool_large_allocation_scenario() {
        const SIX_MIB: usize = 6 * 1024 * 1024;
        let pool = VariablePool::create(SIX_MIB, Protection::Protected).unwrap();

        let p1 = pool.allocate(64).unwrap();
        let p2 = pool.allocate(128).unwrap();
        drop(p1);
        drop(p2);
        assert_eq!(pool.free_bytes(), SIX_MIB);
        assert_eq!(pool.outstanding_bytes(), 0);

        let p3 = pool.allocate(SIX_MIB).unwrap();
        assert_eq!(p3.as_slice().len(), SIX_MIB);
        drop(p3);
        assert_eq!(pool.free_bytes(), SIX_MIB);
        assert_eq!(pool.outstanding_bytes(), 0);
    }

    #[test]
    fn exhausted_when_no_block_is_large_enough() {
        let pool = VariablePool::create(64, Protection::Protected).unwrap();
        let _a = pool.allocate(64).unwrap();
        assert!(matches!(pool.allocate(1), Err(Error::Exhausted)));
    }

    #[test]
    fn allocation_is_readable_and_writable() {
        let pool = VariablePool::create(256, Protection::Protected).unwrap();
        let mut a = pool.allocate(8).unwrap();
        a.as_mut_slice().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(a.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    // Boundary behavior from spec.md §8: a free block exactly MIN_SPLIT - 1
    // bytes larger than the request is consumed whole (no split); one that
    // is MIN_SPLIT bytes larger splits, leaving a MIN_SPLIT-sized remainder.
    #[test]
    fn split_boundary_at_min_split() {
        let below = VariablePool::create(64 + MIN_SPLIT - 1, Protection::Protected).unwrap();
        let _a = below.allocate(64).unwrap();
        assert_eq!(below.free_bytes(), 0);

        let at = VariablePool::create(64 + MIN_SPLIT, Protection::Protected).unwrap();
        let _b = at.allocate(64).unwrap();
        assert_eq!(at.free_bytes(), MIN_SPLIT);
    }

    #[test]
    fn freeing_in_either_order_coalesces_fully() {
        let pool = VariablePool::create(4096, Protection::Protected).unwrap();
        let a = pool.allocate(100).unwrap();
        let b = pool.allocate(200).unwrap();
        let c = pool.allocate(300).unwrap();
        drop(b);
        drop(a);
        drop(c);
        assert_eq!(pool.free_bytes(), 4096);
        assert_eq!(pool.outstanding_bytes(), 0);
    }

    #[test]
    fn pin_and_unpin_do_not_panic() {
        let pool = VariablePool::create(1024, Protection::Protected).unwrap();
        pool.pin();
        pool.unpin();
    }
}
