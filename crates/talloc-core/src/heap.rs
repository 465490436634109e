//! Heap state and the four allocator operations.
//!
//! A [`Heap`] owns the catalog of blocks carved out of one
//! [`RegionSource`]. Operations take `&mut self` and never lock: the
//! caller serializes access (the abi crate wraps the process-global
//! heap in a single mutex).
//!
//! Allocation policy is deliberately simple: first fit, no splitting,
//! no coalescing. A released block is physically returned to the
//! region only when it is the trailing block (its payload end
//! coincides with the current break); every other released block stays
//! resident and is reused by later allocations of equal or smaller
//! size.

use std::ptr::{self, NonNull};

use crate::block::{self, BlockHeader, GRANULE, HEADER_SIZE};
use crate::error::AllocError;
use crate::region::RegionSource;
use crate::stats::HeapStats;

/// A first-fit heap over a single growable region.
///
/// `head`/`tail` bound the address-ordered catalog; both are null iff
/// the heap has never allocated (or every block has been reclaimed).
/// `tail.next` is always null.
pub struct Heap<R: RegionSource> {
    region: R,
    head: *mut BlockHeader,
    tail: *mut BlockHeader,
    stats: HeapStats,
}

// SAFETY: the raw catalog pointers are only dereferenced through
// `&mut self`; moving a Heap to another thread moves exclusive access
// with it.
unsafe impl<R: RegionSource + Send> Send for Heap<R> {}

impl<R: RegionSource> Heap<R> {
    /// Creates an empty heap over `region`.
    pub fn new(region: R) -> Self {
        Self {
            region,
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            stats: HeapStats::default(),
        }
    }

    /// Allocates at least `size` bytes of contiguous payload.
    ///
    /// Reuses the first free block of sufficient capacity without
    /// shrinking it, so the payload may be larger than requested.
    /// Otherwise extends the region and appends a fresh block at the
    /// break.
    ///
    /// # Errors
    ///
    /// [`AllocError::ZeroSize`] for `size == 0` (the catalog is not
    /// touched); [`AllocError::RegionExhausted`] when the region source
    /// refuses to grow. No partial state is committed on failure.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let rounded =
            block::round_up(size).ok_or(AllocError::RegionExhausted { requested: size })?;

        if let Some(header) = self.find_free_block(rounded) {
            let raw = header.as_ptr();
            // SAFETY: find_free_block only yields catalog headers.
            unsafe {
                (*raw).is_free = false;
                self.stats.reuse_hits += 1;
                self.stats.active_blocks += 1;
                self.stats.live_bytes += (*raw).size;
                return Ok(BlockHeader::payload(header));
            }
        }

        self.append_fresh(rounded)
    }

    /// Returns a block to the heap.
    ///
    /// The trailing block (payload end at the current break) is
    /// detached from the catalog and its memory handed back to the
    /// region; any other block is marked free and kept resident for
    /// first-fit reuse.
    ///
    /// # Safety
    ///
    /// `payload` must have been returned by [`Heap::allocate`],
    /// [`Heap::allocate_zeroed`] or [`Heap::resize`] on this heap and
    /// must not have been released since. The caller must not touch the
    /// payload afterwards. Violations are undefined behavior; they are
    /// not detected.
    pub unsafe fn release(&mut self, payload: NonNull<u8>) {
        // SAFETY: per the contract, the header precedes the payload and
        // is a live member of the catalog.
        let header = unsafe { BlockHeader::from_payload(payload) };
        let raw = header.as_ptr();
        let size = unsafe { (*raw).size };
        debug_assert!(unsafe { !(*raw).is_free }, "block released twice");

        self.stats.active_blocks = self.stats.active_blocks.saturating_sub(1);
        self.stats.live_bytes = self.stats.live_bytes.saturating_sub(size);

        // SAFETY: the payload spans `size` bytes; one-past-the-end is a
        // valid address to form.
        let end = unsafe { payload.as_ptr().add(size) };
        if end == self.region.brk() && raw == self.tail {
            self.detach_tail(raw);
            if self.region.shrink(HEADER_SIZE + size) {
                self.stats.region_shrinks += 1;
            }
            return;
        }

        // Not at the boundary (or the break moved under us): keep the
        // block resident for reuse.
        unsafe { (*raw).is_free = true };
    }

    /// Allocates `count * elem_size` bytes, zero-filled.
    ///
    /// # Errors
    ///
    /// [`AllocError::ZeroSize`] when either input is zero,
    /// [`AllocError::Overflow`] when the product does not fit in
    /// `usize` (it never silently wraps to a smaller allocation), plus
    /// anything [`Heap::allocate`] reports.
    pub fn allocate_zeroed(
        &mut self,
        count: usize,
        elem_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if count == 0 || elem_size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let total = count
            .checked_mul(elem_size)
            .ok_or(AllocError::Overflow { count, elem_size })?;
        let payload = self.allocate(total)?;
        // SAFETY: allocate returned at least `total` writable bytes.
        unsafe { ptr::write_bytes(payload.as_ptr(), 0, total) };
        Ok(payload)
    }

    /// Grows a block to at least `new_size` bytes.
    ///
    /// If the existing block already satisfies `new_size`, the same
    /// pointer is returned and nothing changes. Otherwise a fresh block
    /// is allocated, the old payload is copied into it, and the old
    /// block is released.
    ///
    /// # Errors
    ///
    /// [`AllocError::ZeroSize`] for `new_size == 0`; on allocation
    /// failure the original block remains valid and unmodified.
    ///
    /// # Safety
    ///
    /// Same contract as [`Heap::release`]: `payload` must be a live
    /// allocation of this heap. On relocation the old pointer is
    /// released and must no longer be used.
    pub unsafe fn resize(
        &mut self,
        payload: NonNull<u8>,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if new_size == 0 {
            return Err(AllocError::ZeroSize);
        }
        // SAFETY: per the contract, `payload` is a live allocation.
        let header = unsafe { BlockHeader::from_payload(payload) };
        let old_size = unsafe { (*header.as_ptr()).size };
        if old_size >= new_size {
            return Ok(payload);
        }

        let fresh = self.allocate(new_size)?;
        // SAFETY: the old payload spans `old_size` bytes; the fresh one
        // spans at least `new_size > old_size`, and the two blocks are
        // disjoint (the old block is still in use during allocate).
        unsafe {
            ptr::copy_nonoverlapping(payload.as_ptr(), fresh.as_ptr(), old_size);
            self.release(payload);
        }
        Ok(fresh)
    }

    /// Payload capacity of a live block, which may exceed the size
    /// originally requested for it.
    ///
    /// # Safety
    ///
    /// `payload` must be a live allocation of this heap.
    #[must_use]
    pub unsafe fn capacity_of(&self, payload: NonNull<u8>) -> usize {
        // SAFETY: per the contract, the header precedes the payload.
        unsafe { (*BlockHeader::from_payload(payload).as_ptr()).size }
    }

    /// Counters accumulated since the heap was created.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    /// The region source backing this heap.
    #[must_use]
    pub fn region(&self) -> &R {
        &self.region
    }

    /// Number of blocks in the catalog, free or in use.
    #[must_use]
    pub fn block_count(&self) -> usize {
        let mut count = 0;
        let mut cur = self.head;
        while !cur.is_null() {
            count += 1;
            // SAFETY: the chain links only catalog headers and is
            // null-terminated at `tail`.
            cur = unsafe { (*cur).next };
        }
        count
    }

    /// Number of free (resident, reusable) blocks in the catalog.
    #[must_use]
    pub fn free_block_count(&self) -> usize {
        let mut count = 0;
        let mut cur = self.head;
        while !cur.is_null() {
            // SAFETY: as in block_count.
            unsafe {
                if (*cur).is_free {
                    count += 1;
                }
                cur = (*cur).next;
            }
        }
        count
    }

    /// First-fit locator: the first free block with at least `size`
    /// bytes of capacity, in address order. "Not found" is not a fault.
    fn find_free_block(&self, size: usize) -> Option<NonNull<BlockHeader>> {
        let mut cur = self.head;
        while !cur.is_null() {
            // SAFETY: as in block_count.
            unsafe {
                if (*cur).is_free && (*cur).size >= size {
                    return Some(NonNull::new_unchecked(cur));
                }
                cur = (*cur).next;
            }
        }
        None
    }

    /// Extends the region and appends a fresh in-use block at the old
    /// break. `size` is already granule-rounded.
    fn append_fresh(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        // A foreign break consumer may have left the break misaligned;
        // pad so the new header lands on a granule boundary. Padding is
        // never tracked and never reclaimed.
        let misalign = self.region.brk() as usize % GRANULE;
        if misalign != 0 && self.region.extend(GRANULE - misalign).is_none() {
            self.stats.failed_extends += 1;
            return Err(AllocError::RegionExhausted { requested: size });
        }

        let total = HEADER_SIZE
            .checked_add(size)
            .ok_or(AllocError::RegionExhausted { requested: size })?;
        let Some(base) = self.region.extend(total) else {
            self.stats.failed_extends += 1;
            return Err(AllocError::RegionExhausted { requested: size });
        };

        let header = base.cast::<BlockHeader>();
        let raw = header.as_ptr();
        // SAFETY: the extension spans HEADER_SIZE + size bytes starting
        // at `base`, and `base` is granule-aligned.
        unsafe {
            raw.write(BlockHeader {
                size,
                is_free: false,
                next: ptr::null_mut(),
            });
        }

        if self.head.is_null() {
            self.head = raw;
        }
        if !self.tail.is_null() {
            // SAFETY: tail is the last catalog header.
            unsafe { (*self.tail).next = raw };
        }
        self.tail = raw;

        self.stats.region_extends += 1;
        self.stats.active_blocks += 1;
        self.stats.live_bytes += size;

        // SAFETY: the block spans more than HEADER_SIZE bytes.
        Ok(unsafe { BlockHeader::payload(header) })
    }

    /// Removes the trailing block from the catalog before the region is
    /// shrunk past it.
    fn detach_tail(&mut self, tail: *mut BlockHeader) {
        if self.head == tail {
            self.head = ptr::null_mut();
            self.tail = ptr::null_mut();
            return;
        }
        // Rescan from head for the predecessor. The address-order
        // invariant guarantees it is reachable; starting at head (rather
        // than at the removed block) keeps that true even for the first
        // block.
        let mut cur = self.head;
        while !cur.is_null() {
            // SAFETY: as in block_count.
            let next = unsafe { (*cur).next };
            if next == tail {
                // SAFETY: cur is the predecessor of the old tail.
                unsafe { (*cur).next = ptr::null_mut() };
                self.tail = cur;
                return;
            }
            cur = next;
        }
        debug_assert!(false, "tail unreachable from head");
    }
}

impl Heap<crate::region::FixedRegion> {
    /// Convenience constructor: a heap over a fixed reservation of
    /// `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(crate::region::FixedRegion::new(capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::FixedRegion;

    #[test]
    fn test_allocate_zero_rejected() {
        let mut heap = Heap::with_capacity(4096);
        assert_eq!(heap.allocate(0), Err(AllocError::ZeroSize));
        // A fast-failed request never touches the catalog.
        assert_eq!(heap.block_count(), 0);
        assert_eq!(heap.region().used(), 0);
    }

    #[test]
    fn test_allocate_appends_at_break() {
        let mut heap = Heap::with_capacity(4096);
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(32).unwrap();
        assert_eq!(
            b.as_ptr() as usize,
            a.as_ptr() as usize + 16 + HEADER_SIZE,
            "blocks are contiguous in allocation order"
        );
        assert_eq!(heap.block_count(), 2);
        assert_eq!(heap.region().used(), 2 * HEADER_SIZE + 16 + 32);
    }

    #[test]
    fn test_payloads_are_writable_and_disjoint() {
        let mut heap = Heap::with_capacity(4096);
        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();
        unsafe {
            ptr::write_bytes(a.as_ptr(), 0xAA, 64);
            ptr::write_bytes(b.as_ptr(), 0x55, 64);
            assert!((0..64).all(|i| *a.as_ptr().add(i) == 0xAA));
            assert!((0..64).all(|i| *b.as_ptr().add(i) == 0x55));
        }
    }

    #[test]
    fn test_first_fit_reuses_first_adequate_block() {
        // The spec scenario: allocate(16), allocate(32), release the
        // first, allocate(8) comes back at the first address.
        let mut heap = Heap::with_capacity(4096);
        let first = heap.allocate(16).unwrap();
        let _second = heap.allocate(32).unwrap();
        unsafe { heap.release(first) };
        assert_eq!(heap.free_block_count(), 1);

        let reused = heap.allocate(8).unwrap();
        assert_eq!(reused, first);
        // The oversized block keeps its capacity; nothing is split.
        assert_eq!(unsafe { heap.capacity_of(reused) }, 16);
        assert_eq!(heap.block_count(), 2);
        assert_eq!(heap.stats().reuse_hits, 1);
    }

    #[test]
    fn test_reuse_skips_too_small_blocks() {
        let mut heap = Heap::with_capacity(4096);
        let small = heap.allocate(16).unwrap();
        let large = heap.allocate(64).unwrap();
        let _guard = heap.allocate(16).unwrap();
        unsafe {
            heap.release(small);
            heap.release(large);
        }
        // 32 does not fit the 16-byte block; first fit lands on the
        // 64-byte one.
        let reused = heap.allocate(32).unwrap();
        assert_eq!(reused, large);
        assert_eq!(unsafe { heap.capacity_of(reused) }, 64);
    }

    #[test]
    fn test_trailing_release_shrinks_region() {
        let mut heap = Heap::with_capacity(4096);
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(32).unwrap();
        let before = heap.region().used();

        unsafe { heap.release(b) };
        assert_eq!(
            heap.region().used(),
            before - (HEADER_SIZE + 32),
            "region strictly decreases by header + block size"
        );
        assert_eq!(heap.block_count(), 1);
        assert_eq!(heap.stats().region_shrinks, 1);

        unsafe { heap.release(a) };
        // Last block out: catalog empty, region fully returned.
        assert_eq!(heap.block_count(), 0);
        assert_eq!(heap.region().used(), 0);
    }

    #[test]
    fn test_single_block_release_empties_catalog_and_shrinks() {
        let mut heap = Heap::with_capacity(4096);
        let only = heap.allocate(48).unwrap();
        unsafe { heap.release(only) };
        assert_eq!(heap.block_count(), 0);
        assert_eq!(heap.region().used(), 0);

        // The heap stays usable after head/tail were cleared.
        let again = heap.allocate(48).unwrap();
        assert_eq!(again, only);
        assert_eq!(heap.block_count(), 1);
    }

    #[test]
    fn test_non_trailing_release_keeps_tail_and_residency() {
        let mut heap = Heap::with_capacity(4096);
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        let before = heap.region().used();

        unsafe { heap.release(a) };
        // Not at the boundary: stays resident, region unchanged, tail
        // untouched.
        assert_eq!(heap.region().used(), before);
        assert_eq!(heap.block_count(), 2);
        assert_eq!(heap.free_block_count(), 1);
        assert_eq!(heap.stats().region_shrinks, 0);

        // A request too large for the freed block still appends after
        // the unchanged tail.
        let c = heap.allocate(64).unwrap();
        assert!(c.as_ptr() > b.as_ptr());
        assert_eq!(
            c.as_ptr() as usize,
            b.as_ptr() as usize + 16 + HEADER_SIZE
        );
    }

    #[test]
    fn test_release_of_middle_then_tail_rechains() {
        let mut heap = Heap::with_capacity(4096);
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        let c = heap.allocate(16).unwrap();
        unsafe {
            heap.release(b);
            heap.release(c);
        }
        // c was trailing and reclaimed; b stays resident and free; a is
        // the new tail's predecessor chain is intact.
        assert_eq!(heap.block_count(), 2);
        assert_eq!(heap.free_block_count(), 1);
        // b is now the trailing block; releasing the reused b shrinks.
        let reused = heap.allocate(8).unwrap();
        assert_eq!(reused, b);
        let used = heap.region().used();
        unsafe { heap.release(reused) };
        assert_eq!(heap.region().used(), used - (HEADER_SIZE + 16));
        let _ = a;
    }

    #[test]
    fn test_allocate_zeroed_contents() {
        let mut heap = Heap::with_capacity(4096);
        // Dirty a block, release it, then demand zeroed memory of the
        // same size: first-fit hands the dirty block back and every byte
        // must have been cleared.
        let dirty = heap.allocate(64).unwrap();
        let _guard = heap.allocate(16).unwrap();
        unsafe {
            ptr::write_bytes(dirty.as_ptr(), 0xFF, 64);
            heap.release(dirty);
        }
        let zeroed = heap.allocate_zeroed(16, 4).unwrap();
        assert_eq!(zeroed, dirty);
        unsafe {
            assert!((0..64).all(|i| *zeroed.as_ptr().add(i) == 0));
        }
    }

    #[test]
    fn test_allocate_zeroed_rejects_zero_and_overflow() {
        let mut heap = Heap::with_capacity(4096);
        assert_eq!(heap.allocate_zeroed(0, 8), Err(AllocError::ZeroSize));
        assert_eq!(heap.allocate_zeroed(8, 0), Err(AllocError::ZeroSize));
        assert_eq!(
            heap.allocate_zeroed(usize::MAX, 2),
            Err(AllocError::Overflow {
                count: usize::MAX,
                elem_size: 2
            })
        );
        assert_eq!(heap.block_count(), 0);
    }

    #[test]
    fn test_resize_within_capacity_returns_same_pointer() {
        let mut heap = Heap::with_capacity(4096);
        let p = heap.allocate(64).unwrap();
        unsafe {
            assert_eq!(heap.resize(p, 64), Ok(p));
            assert_eq!(heap.resize(p, 16), Ok(p));
            // Capacity is never shrunk in place.
            assert_eq!(heap.capacity_of(p), 64);
        }
    }

    #[test]
    fn test_resize_relocates_copies_and_releases_old() {
        let mut heap = Heap::with_capacity(4096);
        let p = heap.allocate(16).unwrap();
        let _guard = heap.allocate(16).unwrap();
        unsafe {
            for i in 0..16 {
                *p.as_ptr().add(i) = i as u8;
            }
            let grown = heap.resize(p, 64).unwrap();
            assert_ne!(grown, p);
            assert!((0..16).all(|i| *grown.as_ptr().add(i) == i as u8));

            // The superseded block was released, not leaked: a matching
            // request gets its address back.
            let reused = heap.allocate(16).unwrap();
            assert_eq!(reused, p);
        }
    }

    #[test]
    fn test_resize_zero_rejected() {
        let mut heap = Heap::with_capacity(4096);
        let p = heap.allocate(16).unwrap();
        assert_eq!(unsafe { heap.resize(p, 0) }, Err(AllocError::ZeroSize));
    }

    #[test]
    fn test_resize_failure_leaves_original_intact() {
        let mut heap = Heap::with_capacity(HEADER_SIZE + 16);
        let p = heap.allocate(16).unwrap();
        unsafe {
            ptr::write_bytes(p.as_ptr(), 0x5A, 16);
            let err = heap.resize(p, 1024).unwrap_err();
            assert!(matches!(err, AllocError::RegionExhausted { .. }));
            assert!((0..16).all(|i| *p.as_ptr().add(i) == 0x5A));
            assert_eq!(heap.capacity_of(p), 16);
        }
        assert_eq!(heap.block_count(), 1);
    }

    #[test]
    fn test_region_exhaustion_reports_and_commits_nothing() {
        let mut heap = Heap::with_capacity(HEADER_SIZE + 16);
        let _p = heap.allocate(16).unwrap();
        let err = heap.allocate(16).unwrap_err();
        assert_eq!(err, AllocError::RegionExhausted { requested: 16 });
        assert_eq!(heap.block_count(), 1);
        assert_eq!(heap.stats().failed_extends, 1);
    }

    #[test]
    fn test_requests_are_granule_rounded() {
        let mut heap = Heap::with_capacity(4096);
        let p = heap.allocate(1).unwrap();
        assert_eq!(unsafe { heap.capacity_of(p) }, GRANULE);
        assert_eq!(p.as_ptr() as usize % GRANULE, 0);
    }

    #[test]
    fn test_stats_accounting() {
        let mut heap = Heap::with_capacity(4096);
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(32).unwrap();
        assert_eq!(heap.stats().active_blocks, 2);
        assert_eq!(heap.stats().live_bytes, 48);
        assert_eq!(heap.stats().region_extends, 2);

        unsafe { heap.release(a) };
        assert_eq!(heap.stats().active_blocks, 1);
        assert_eq!(heap.stats().live_bytes, 32);

        let reused = heap.allocate(8).unwrap();
        assert_eq!(reused, a);
        // Reuse accounts the block's full capacity, not the request.
        assert_eq!(heap.stats().live_bytes, 48);
        assert_eq!(heap.stats().reuse_hits, 1);
        let _ = b;
    }

    #[test]
    fn test_independent_heaps_coexist() {
        let mut first = Heap::new(FixedRegion::new(1024));
        let mut second = Heap::new(FixedRegion::new(1024));
        let a = first.allocate(64).unwrap();
        let b = second.allocate(64).unwrap();
        assert_ne!(a, b);
        assert_eq!(first.block_count(), 1);
        assert_eq!(second.block_count(), 1);
        unsafe {
            first.release(a);
            second.release(b);
        }
        assert_eq!(first.region().used(), 0);
        assert_eq!(second.region().used(), 0);
    }
}
