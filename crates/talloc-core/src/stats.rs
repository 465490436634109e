//! Heap observability counters.
//!
//! Allocation-free by construction: the heap updates plain integers
//! while it holds the caller's lock, so bookkeeping can never recurse
//! into the allocator it describes.

/// Counters maintained by a [`crate::Heap`] across its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Allocations served by reusing a free block (first-fit hit).
    pub reuse_hits: u64,
    /// Region extensions performed for fresh blocks.
    pub region_extends: u64,
    /// Region extensions refused by the source.
    pub failed_extends: u64,
    /// Trailing blocks physically returned to the region.
    pub region_shrinks: u64,
    /// Blocks currently in use by callers.
    pub active_blocks: usize,
    /// Payload bytes currently in use by callers.
    pub live_bytes: usize,
}
