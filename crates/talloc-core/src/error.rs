//! Allocation error taxonomy.
//!
//! Every failure is terminal for the call that produced it: no retries,
//! no partial mutation of the catalog. Caller misuse (releasing a
//! foreign or already-released pointer, touching a payload after
//! release) is a safety precondition on the `unsafe` operations, not an
//! error variant — it is not detected.

use thiserror::Error;

/// Why an allocator operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// A zero size (or zero element count) was requested.
    #[error("zero-sized request rejected")]
    ZeroSize,

    /// `count * elem_size` does not fit in `usize`.
    #[error("allocation size overflow: {count} * {elem_size}")]
    Overflow { count: usize, elem_size: usize },

    /// The region source refused to extend the managed region.
    #[error("region exhausted while requesting {requested} bytes")]
    RegionExhausted { requested: usize },
}
