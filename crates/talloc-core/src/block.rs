//! Block headers and payload pointer arithmetic.
//!
//! Every managed block is a [`BlockHeader`] immediately followed by its
//! payload. Callers only ever see the payload address; the header is
//! recovered in O(1) by stepping back over `HEADER_SIZE` bytes.
//!
//! Headers are 16-aligned and payload sizes are rounded up to the same
//! granule, so as long as a region hands out 16-aligned extensions,
//! every header (and every payload) stays aligned. The original C
//! implementation gets the same granule from a 16-byte union stub.

use std::mem;
use std::ptr::NonNull;

/// Alignment granule for headers and payload sizes, in bytes.
pub const GRANULE: usize = 16;

/// Size of the metadata prefix of every block, in bytes.
pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// Metadata prefixed to every allocated region.
///
/// Headers form a singly linked chain in increasing address order.
/// `size` is the usable payload capacity in bytes, fixed at creation
/// and never shrunk in place.
#[repr(C, align(16))]
pub struct BlockHeader {
    pub size: usize,
    pub is_free: bool,
    pub next: *mut BlockHeader,
}

impl BlockHeader {
    /// Payload address of the block at `header` (one header past it).
    ///
    /// # Safety
    ///
    /// `header` must point to a live header whose block spans at least
    /// `HEADER_SIZE` bytes of the managed region.
    #[inline]
    #[must_use]
    pub unsafe fn payload(header: NonNull<BlockHeader>) -> NonNull<u8> {
        // SAFETY: the payload starts directly after the header, inside
        // the same block.
        unsafe { NonNull::new_unchecked(header.as_ptr().cast::<u8>().add(HEADER_SIZE)) }
    }

    /// Recovers the header of the block whose payload starts at `payload`.
    ///
    /// # Safety
    ///
    /// `payload` must be a pointer previously produced by
    /// [`BlockHeader::payload`] for a block that is still part of the
    /// catalog.
    #[inline]
    #[must_use]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<BlockHeader> {
        // SAFETY: the header immediately precedes the payload.
        unsafe { NonNull::new_unchecked(payload.as_ptr().sub(HEADER_SIZE).cast::<BlockHeader>()) }
    }
}

/// Rounds `size` up to the next multiple of [`GRANULE`].
///
/// Returns `None` when the rounded value would not fit in `usize`.
#[inline]
#[must_use]
pub fn round_up(size: usize) -> Option<usize> {
    Some(size.checked_add(GRANULE - 1)? & !(GRANULE - 1))
}
