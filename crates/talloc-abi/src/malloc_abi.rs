//! ABI layer for the allocator family (`malloc`, `free`, `calloc`,
//! `realloc`).
//!
//! Failures of any kind surface as a null pointer; the caller sees the
//! classic C contract. `realloc` keeps the original implementation's
//! contract rather than POSIX: a null pointer or a zero size yields
//! null (it is neither `malloc` nor `free` in disguise).
//!
//! In test mode (`debug_assertions`), `no_mangle` is suppressed so the
//! test binary does not shadow the system allocator it itself runs on.

use std::ffi::c_void;
use std::ptr::NonNull;

use crate::global_heap::with_heap;

/// Allocates `size` bytes of uninitialized memory.
///
/// Returns a pointer to at least `size` contiguous bytes, or null when
/// `size` is zero or the region cannot grow. Reuses a previously
/// released block when one of sufficient capacity exists.
///
/// # Safety
///
/// Caller must eventually `free` the returned pointer exactly once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    with_heap(|heap| match heap.allocate(size) {
        Ok(payload) => payload.as_ptr().cast(),
        Err(_) => std::ptr::null_mut(),
    })
}

/// Deallocates memory previously returned by `malloc`, `calloc`, or
/// `realloc`.
///
/// If `ptr` is null, no operation is performed.
///
/// # Safety
///
/// `ptr` must have been returned by a previous call to `malloc`,
/// `calloc`, or `realloc` of this allocator and must not have been
/// freed already. Passing a foreign or already-freed pointer is
/// undefined behavior; it is not detected.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    let Some(payload) = NonNull::new(ptr.cast::<u8>()) else {
        return;
    };
    with_heap(|heap| {
        // SAFETY: forwarded caller contract; see the function docs.
        unsafe { heap.release(payload) };
    });
}

/// Allocates zero-filled memory for `count` objects of `elem_size`
/// bytes each.
///
/// Returns null when either argument is zero or when
/// `count * elem_size` overflows; the overflow never wraps into a
/// smaller allocation.
///
/// # Safety
///
/// Caller must eventually `free` the returned pointer exactly once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn calloc(count: usize, elem_size: usize) -> *mut c_void {
    with_heap(|heap| match heap.allocate_zeroed(count, elem_size) {
        Ok(payload) => payload.as_ptr().cast(),
        Err(_) => std::ptr::null_mut(),
    })
}

/// Grows an allocation to at least `size` bytes, relocating if needed.
///
/// Returns `ptr` unchanged when the block already has the capacity;
/// otherwise returns a fresh pointer whose leading bytes equal the old
/// payload, with the old block released. Returns null (and leaves the
/// original allocation valid) when `ptr` is null, `size` is zero, or
/// the new allocation fails.
///
/// # Safety
///
/// `ptr` must be null or a live allocation of this allocator. After a
/// relocating call the old pointer must no longer be used.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    let Some(payload) = NonNull::new(ptr.cast::<u8>()) else {
        return std::ptr::null_mut();
    };
    if size == 0 {
        return std::ptr::null_mut();
    }
    with_heap(|heap| {
        // SAFETY: forwarded caller contract; see the function docs.
        match unsafe { heap.resize(payload, size) } {
            Ok(fresh) => fresh.as_ptr().cast(),
            Err(_) => std::ptr::null_mut(),
        }
    })
}
