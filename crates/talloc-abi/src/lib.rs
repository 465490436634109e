//! # talloc-abi
//!
//! C-compatible entry points (`malloc`, `free`, `calloc`, `realloc`)
//! over a single process-wide [`talloc_core::Heap`] backed by the real
//! `sbrk` break.
//!
//! Every entry point takes the one global exclusion lock, consults or
//! mutates the heap, and releases the lock before returning: exactly
//! one thread executes allocator logic at any instant. The heap is
//! created inside the lock on the first allocation and lives for the
//! process lifetime; there is no teardown.

mod global_heap;
pub mod malloc_abi;

pub use global_heap::global_heap_stats;
pub use malloc_abi::{calloc, free, malloc, realloc};
