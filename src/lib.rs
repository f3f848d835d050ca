//! A multithreaded, general-purpose memory allocator: thread-local
//! size-class arenas backed by a per-thread superpage pool, with
//! lock-free cross-thread deallocation and a page-indexed metadata map
//! for O(1) free-side lookup.
//!
//! The crate exposes two surfaces: a table-form API (`allocate`,
//! `release`, `usable_size`, `reallocate`, `aligned_allocate`) that
//! mirrors the shape of a C allocator vtable, and a thin [`ThreadHeap`]
//! adapter implementing [`GlobalAlloc`] over it for installation as
//! `#[global_allocator]`. Thread attachment (assigning a
//! [`thread::ThreadId`]) and thread-exit notification are the two
//! collaborators this crate expects its embedder to drive; see
//! `thread::attach`.

pub mod buddy;
pub mod classify;
pub mod error;
pub mod heap;
pub mod index;
pub mod options;
pub mod os;
pub mod pageblock;
pub mod stats;
mod sync;
pub mod thread;

use core::alloc::{GlobalAlloc, Layout};
use std::ptr;

pub use thread::{attach, detach, ThreadId};

/// Allocates at least `bytes` bytes, returning null on exhaustion.
/// Routes through the calling thread's heap, auto-attaching it with a
/// synthesized id if the embedder never called [`attach`].
pub fn allocate(bytes: usize) -> *mut u8 {
    if bytes == 0 {
        return ptr::null_mut();
    }
    let heap = unsafe { &mut *thread::current_heap() };
    heap::alloc(heap, bytes).unwrap_or(ptr::null_mut())
}

/// Releases a pointer previously returned by `allocate`/`reallocate`/
/// `aligned_allocate`. Null is a no-op.
///
/// # Safety
/// `ptr` must be null or a still-live pointer this allocator produced.
pub unsafe fn release(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let heap = &mut *thread::current_heap();
    heap::free(heap, ptr);
}

/// Returns the usable size of the block at `ptr` — at least as large as
/// the size it was requested with, possibly larger due to size-class
/// rounding. Null or an unregistered pointer returns `0`.
pub fn usable_size(ptr: *const u8) -> usize {
    if ptr.is_null() {
        return 0;
    }
    heap::usable_size(ptr)
}

/// Resizes the block at `ptr` to `bytes`, preserving the leading
/// `min(old_usable_size, bytes)` bytes, the same contract `realloc`
/// carries in the C ABI this crate's shim is expected to wrap. `ptr` may
/// be null, in which case this behaves like `allocate`; `bytes == 0`
/// releases `ptr` and returns null.
///
/// # Safety
/// `ptr` must be null or a still-live pointer this allocator produced.
pub unsafe fn reallocate(ptr: *mut u8, bytes: usize) -> *mut u8 {
    if ptr.is_null() {
        return allocate(bytes);
    }
    if bytes == 0 {
        release(ptr);
        return ptr::null_mut();
    }
    let old_size = heap::usable_size(ptr);
    if bytes <= old_size {
        // Shrinking in place is always valid: usable size only grows via
        // size-class rounding, never shrinks below what was handed out.
        return ptr;
    }
    let fresh = allocate(bytes);
    if fresh.is_null() {
        return ptr::null_mut();
    }
    let copy_len = old_size.min(bytes);
    ptr::copy_nonoverlapping(ptr, fresh, copy_len);
    release(ptr);
    fresh
}

/// Allocates at least `bytes` bytes aligned to `align`, which must be a
/// power of two. Alignments up to the platform word size are satisfied
/// by the ordinary size-class dispatch; wider alignments are served
/// directly from the page provider.
pub fn aligned_allocate(align: usize, bytes: usize) -> *mut u8 {
    if bytes == 0 || !align.is_power_of_two() {
        return ptr::null_mut();
    }
    let heap = unsafe { &mut *thread::current_heap() };
    heap::alloc_aligned(heap, align, bytes).unwrap_or(ptr::null_mut())
}

/// `GlobalAlloc` adapter over the table-form API above. A thin wrapper,
/// not a second implementation: every method here is one call into
/// `allocate`/`release`/`reallocate`/`aligned_allocate`.
pub struct ThreadHeap;

unsafe impl GlobalAlloc for ThreadHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= core::mem::align_of::<usize>() {
            allocate(layout.size())
        } else {
            aligned_allocate(layout.align(), layout.size())
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        release(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() <= core::mem::align_of::<usize>() {
            reallocate(ptr, new_size)
        } else {
            // `reallocate` doesn't carry an alignment parameter; preserve
            // it manually rather than risk handing back a misaligned
            // block for an over-aligned type.
            let fresh = aligned_allocate(layout.align(), new_size);
            if fresh.is_null() {
                return ptr::null_mut();
            }
            let old_size = usable_size(ptr);
            let copy_len = old_size.min(new_size);
            ptr::copy_nonoverlapping(ptr, fresh, copy_len);
            release(ptr);
            fresh
        }
    }
}
