//! # talloc-core
//!
//! A first-fit heap over a single growable memory region, in the shape
//! of the classic `sbrk`-backed malloc:
//! - every allocation is a header-prefixed block in one address-ordered
//!   singly linked catalog;
//! - allocate reuses the first free block of sufficient size, or extends
//!   the region at the break;
//! - release physically returns the trailing block to the region and
//!   merely marks every other block free for reuse.
//!
//! A [`Heap`] is an explicit value owning its [`RegionSource`], so
//! multiple independent heaps can coexist in one process (backed by
//! [`FixedRegion`]); the process-global `sbrk` heap with its exclusion
//! lock lives in the `talloc-abi` crate.
//!
//! The core performs no locking itself: all operations take `&mut self`
//! and the caller provides mutual exclusion.

pub mod block;
pub mod error;
pub mod heap;
pub mod region;
pub mod stats;

pub use block::{BlockHeader, GRANULE, HEADER_SIZE};
pub use error::AllocError;
pub use heap::Heap;
pub use region::{FixedRegion, RegionSource, SbrkRegion};
pub use stats::HeapStats;
