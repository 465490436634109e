//! Region sources: the operating-system extension primitive behind a heap.
//!
//! A [`RegionSource`] models `sbrk`: one contiguous region with a
//! movable upper boundary (the break). Growing returns the previous
//! break, which is the base of the freshly exposed extension; the
//! allocator depends on the boundary being monotonic between its own
//! calls and not shared with another consumer.
//!
//! Two implementations:
//! - [`SbrkRegion`] — the real process break via `libc::sbrk`. Only one
//!   heap per process may sit on it.
//! - [`FixedRegion`] — a fixed-capacity buffer with a software break,
//!   for independent heaps and deterministic tests.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::block::GRANULE;

/// A growable, contiguous memory region with a movable break.
pub trait RegionSource {
    /// Extends the region by `additional` bytes.
    ///
    /// Returns the previous break (the base of the new extension), or
    /// `None` if the source refuses. The call is synchronous and blocks
    /// until satisfied or refused.
    fn extend(&mut self, additional: usize) -> Option<NonNull<u8>>;

    /// Releases the trailing `amount` bytes back to the source.
    ///
    /// Returns `true` if the break actually moved.
    fn shrink(&mut self, amount: usize) -> bool;

    /// Current break: one past the last usable byte of the region.
    fn brk(&self) -> *mut u8;
}

const SBRK_FAILED: *mut libc::c_void = usize::MAX as *mut libc::c_void;

/// The process data-segment break, via `sbrk(2)`.
///
/// The break is a process-global resource: construct at most one
/// `SbrkRegion` per process, and do not mix it with other `sbrk`/`brk`
/// callers. A foreign consumer moving the break does not corrupt the
/// catalog, but blocks stranded below the foreign extension are never
/// physically reclaimed.
#[derive(Debug, Default)]
pub struct SbrkRegion {
    _private: (),
}

impl SbrkRegion {
    #[must_use]
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl RegionSource for SbrkRegion {
    fn extend(&mut self, additional: usize) -> Option<NonNull<u8>> {
        let delta = isize::try_from(additional).ok()?;
        // SAFETY: sbrk with a positive increment either moves the break
        // and returns its prior value or fails with (void*)-1.
        let prev = unsafe { libc::sbrk(delta) };
        if prev == SBRK_FAILED {
            return None;
        }
        NonNull::new(prev.cast::<u8>())
    }

    fn shrink(&mut self, amount: usize) -> bool {
        let Ok(delta) = isize::try_from(amount) else {
            return false;
        };
        // SAFETY: a negative increment never exposes new memory; it only
        // gives the trailing bytes back to the kernel.
        unsafe { libc::sbrk(-delta) != SBRK_FAILED }
    }

    fn brk(&self) -> *mut u8 {
        // SAFETY: sbrk(0) reads the current break without moving it.
        unsafe { libc::sbrk(0).cast::<u8>() }
    }
}

/// A fixed-capacity region with a software break.
///
/// Backed by one 16-aligned buffer from the system allocator; extension
/// past the capacity is refused. This is the backing for independent
/// in-process heaps and for tests that need a deterministic boundary.
#[derive(Debug)]
pub struct FixedRegion {
    base: NonNull<u8>,
    capacity: usize,
    brk_offset: usize,
}

impl FixedRegion {
    /// Reserves a region of `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or the system allocator refuses the
    /// reservation.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "fixed region capacity must be nonzero");
        let layout = Layout::from_size_align(capacity, GRANULE)
            .expect("fixed region capacity does not fit a layout");
        // SAFETY: layout has nonzero size.
        let base = unsafe { alloc::alloc(layout) };
        let Some(base) = NonNull::new(base) else {
            alloc::handle_alloc_error(layout)
        };
        Self {
            base,
            capacity,
            brk_offset: 0,
        }
    }

    /// Total reservation backing this region.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently inside the region (break minus base).
    #[must_use]
    pub fn used(&self) -> usize {
        self.brk_offset
    }
}

impl RegionSource for FixedRegion {
    fn extend(&mut self, additional: usize) -> Option<NonNull<u8>> {
        let new_offset = self.brk_offset.checked_add(additional)?;
        if new_offset > self.capacity {
            return None;
        }
        // SAFETY: brk_offset <= capacity, so the sum stays inside the
        // reservation.
        let prev = unsafe { self.base.as_ptr().add(self.brk_offset) };
        self.brk_offset = new_offset;
        // SAFETY: base is non-null and the offset is in bounds.
        Some(unsafe { NonNull::new_unchecked(prev) })
    }

    fn shrink(&mut self, amount: usize) -> bool {
        match self.brk_offset.checked_sub(amount) {
            Some(offset) => {
                self.brk_offset = offset;
                true
            }
            None => false,
        }
    }

    fn brk(&self) -> *mut u8 {
        // SAFETY: brk_offset never exceeds capacity; one-past-the-end is
        // a valid address to form.
        unsafe { self.base.as_ptr().add(self.brk_offset) }
    }
}

impl Drop for FixedRegion {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.capacity, GRANULE)
            .expect("layout was validated at construction");
        // SAFETY: base was produced by alloc::alloc with this layout.
        unsafe { alloc::dealloc(self.base.as_ptr(), layout) };
    }
}

// SAFETY: FixedRegion uniquely owns its buffer; the raw base pointer is
// only dereferenced through &mut self.
unsafe impl Send for FixedRegion {}
