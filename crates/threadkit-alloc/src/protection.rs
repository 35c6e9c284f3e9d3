//! Shared pool-protection contract and page-pinning helpers (spec.md §4.4,
//! §4.5, §6).

/// Whether a pool internally synchronizes concurrent access.
///
/// `Protected` pools guard their free list with a mutex and may be shared
/// across threads (wrapped in an `Arc`) like any other synchronized type.
/// `Unprotected` pools assume single-threaded access: the free list lives
/// behind a bare `UnsafeCell` with no locking at all, and `allocate`/`free`
/// touch it directly. The contract that no other thread ever calls in is
/// checked with a `debug_assert!` against the creating thread's id (see
/// `check_single_threaded_contract` on each pool); it is not checked in a
/// release build, so calling an `Unprotected` pool from a second thread is
/// a data race, not a panic. Choose `Unprotected` only for pools confined
/// to one thread for their whole lifetime, where the mutex would be pure
/// overhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// Internally synchronized; safe to share across threads.
    Protected,
    /// Caller-confined to a single thread; unsynchronized, checked with
    /// `debug_assert!`.
    Unprotected,
}

/// Ask the OS to lock `len` bytes starting at `ptr` into physical memory.
/// Silently succeeds (is a no-op) on platforms without `mlock`.
///
/// # Safety
///
/// `ptr` must be valid for reads for `len` bytes.
pub(crate) unsafe fn mlock_region(ptr: *const u8, len: usize) {
    #[cfg(unix)]
    {
        // Best-effort: pinning is an optimization hint, not a correctness
        // requirement, so a failure (e.g. RLIMIT_MEMLOCK too low) is not
        // surfaced as an error.
        let _ = libc::mlock(ptr.cast(), len);
    }
    #[cfg(not(unix))]
    {
        let _ = (ptr, len);
    }
}

/// Ask the OS to unlock `len` bytes starting at `ptr`. Silently succeeds
/// (is a no-op) on platforms without `munlock`.
///
/// # Safety
///
/// `ptr` must be valid for reads for `len` bytes.
pub(crate) unsafe fn munlock_region(ptr: *const u8, len: usize) {
    #[cfg(unix)]
    {
        let _ = libc::munlock(ptr.cast(), len);
    }
    #[cfg(not(unix))]
    {
        let _ = (ptr, len);
    }
}
