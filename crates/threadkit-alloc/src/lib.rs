//! Intra-process memory pools: a fixed-size pool with O(1) allocate/free,
//! and a variable-size pool with first-fit allocation and coalescing
//! (spec.md §4.4, §4.5).

pub mod fixed_pool;
pub mod protection;
pub mod variable_pool;

pub use fixed_pool::{Allocation, FixedPool};
pub use protection::Protection;
pub use variable_pool::{VariableAllocation, VariablePool};
