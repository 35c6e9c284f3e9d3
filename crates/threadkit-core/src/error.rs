//! Error taxonomy shared by every crate in the workspace.
//!
//! The original C API reports outcomes as integer status codes
//! (`0 = success`, `-1 = error`, `-2 = timeout`). This rewrite keeps the same
//! taxonomy of outcomes but expresses it as a `Result<T, Error>` so callers
//! use `?` instead of checking a return code, matching the convention
//! `daq_core::error::DaqError` uses throughout the rest of the codebase.

use thiserror::Error;

/// Convenience alias for results using the toolkit's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for every threadkit crate.
///
/// # Error Categories
///
/// - **`InvalidArgument`**: a caller passed a null/non-positive/otherwise
///   malformed argument (zero capacity, `delta == 0`, `min_threads >
///   max_threads`, ...).
/// - **`Uninitialized`**: an operation was attempted against a handle whose
///   construction never completed.
/// - **`Timeout`**: a bounded wait's deadline elapsed before its predicate
///   was satisfied. Guaranteed not to have mutated any user-observable
///   state (spec.md §7).
/// - **`Exhausted`**: a pool has no free slot/block large enough to satisfy
///   the request.
/// - **`SystemError`**: a platform primitive (mutex, condition variable)
///   returned a status this crate did not expect. Treated as unrecoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A required argument was null, zero, negative, or otherwise malformed.
    #[error("invalid argument: {detail}")]
    InvalidArgument {
        /// What was wrong with the argument.
        detail: &'static str,
    },

    /// The handle has not been initialized (or was already destroyed).
    #[error("operation attempted on an uninitialized handle")]
    Uninitialized,

    /// A bounded wait's deadline elapsed before its predicate was satisfied.
    #[error("operation timed out")]
    Timeout,

    /// The pool has no free slot/block that can satisfy the request.
    #[error("pool exhausted")]
    Exhausted,

    /// A platform synchronization primitive returned an unexpected status.
    #[error("system error: {detail}")]
    SystemError {
        /// Description of the unexpected platform status.
        detail: String,
    },
}

impl Error {
    /// Build an [`Error::InvalidArgument`] with a `'static` reason.
    #[must_use]
    pub fn invalid_argument(detail: &'static str) -> Self {
        Error::InvalidArgument { detail }
    }

    /// Build an [`Error::SystemError`] from a displayable cause.
    #[must_use]
    pub fn system(detail: impl std::fmt::Display) -> Self {
        Error::SystemError {
            detail: detail.to_string(),
        }
    }

    /// `true` for [`Error::Timeout`], the only outcome that is expected
    /// in normal operation rather than indicative of caller or system error.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}
