//! The process-global heap and its exclusion lock.

use parking_lot::Mutex;
use talloc_core::{Heap, HeapStats, SbrkRegion};

/// The one heap sitting on the process break, behind the one lock that
/// serializes every allocator operation. `None` until the first
/// allocation; never torn down.
static GLOBAL_HEAP: Mutex<Option<Heap<SbrkRegion>>> = Mutex::new(None);

/// Runs `f` with the global heap under the lock, creating the heap on
/// first use.
///
/// Acquisition blocks the calling thread until the lock is available;
/// there are no timeouts and no lock-free paths.
pub(crate) fn with_heap<T>(f: impl FnOnce(&mut Heap<SbrkRegion>) -> T) -> T {
    let mut guard = GLOBAL_HEAP.lock();
    let heap = guard.get_or_insert_with(|| Heap::new(SbrkRegion::new()));
    f(heap)
}

/// Snapshot of the global heap's counters.
///
/// Returns the default (all-zero) snapshot if the heap has never been
/// touched.
#[must_use]
pub fn global_heap_stats() -> HeapStats {
    GLOBAL_HEAP
        .lock()
        .as_ref()
        .map(Heap::stats)
        .unwrap_or_default()
}
