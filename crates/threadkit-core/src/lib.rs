//! Shared error taxonomy and deadline arithmetic for the `threadkit` crates.
//!
//! Every other crate in the workspace depends on this one and nothing
//! else upstream of it, the same role `daq-core` plays for the rest of the
//! teacher application's crates.

pub mod error;
pub mod time;

pub use error::{Error, Result};
pub use time::{elapsed_ms, Deadline};
