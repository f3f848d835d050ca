//! Thread lifecycle glue.
//!
//! Thread-id *assignment* and exit *notification* are scoped out of the
//! core here: some external hook is expected to
//! call [`attach`] once per OS thread before any allocation happens on
//! it, and to invoke the finalizer on exit. This module owns everything
//! on the core's side of that boundary: stashing the per-thread [`Heap`]
//! handle and running `Heap::finalize` when the
//! thread goes away.
//!
//! The predecessor's `internal.rs` attempted the equivalent of this with
//! `#[cfg(MI_TLS_RECURSE_GUARD)]` raw statics and an `unimplemented!()`
//! `thread_id()` built on per-architecture inline assembly reading the
//! TLS base register directly — a dead end with no actual thread-local
//! semantics on the `static mut` it declared. `std::thread_local!` is the
//! sound, idiomatic replacement and needs no per-architecture assembly;
//! see `DESIGN.md` for this Open Question resolution.

use std::cell::Cell;

use crate::heap::{self, Heap};
use crate::pageblock::ORPHAN;

/// A monotonically increasing thread identifier, assigned by the
/// out-of-scope thread-creation hook. `ORPHAN` is reserved and never
/// handed out to a real thread.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ThreadId(pub usize);

impl ThreadId {
    pub fn is_orphan_sentinel(self) -> bool {
        self.0 == ORPHAN
    }
}

struct Slot {
    heap: Cell<*mut Heap>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let heap = self.heap.get();
        if !heap.is_null() {
            // Safety: this thread is the only one that ever writes its
            // own slot, and TLS destructors run at most once.
            unsafe { (*heap).finalize() };
        }
    }
}

thread_local! {
    static SLOT: Slot = Slot { heap: Cell::new(std::ptr::null_mut()) };
}

/// Attaches the current OS thread to the allocator, assigning it `id`.
/// Idempotent: a thread already attached keeps its existing heap.
/// Must be called before any `allocate`/`release` call on this thread
///.
pub fn attach(id: ThreadId) {
    crate::invariant!(!id.is_orphan_sentinel(), "ORPHAN is a reserved id, not assignable to a thread");
    SLOT.with(|slot| {
        if slot.heap.get().is_null() {
            slot.heap.set(heap::new_heap(id.0));
            log::trace!("thread {} attached", id.0);
        }
    });
}

/// Returns the current thread's heap, auto-attaching with a synthesized
/// id derived from the heap's own address if the out-of-scope hook never
/// called `attach` (e.g. in tests that allocate without going through the
/// C shim's thread hooks). Real deployments are expected to always call
/// `attach` explicitly; this fallback only keeps the table-form API and
/// `GlobalAlloc` adapter usable standalone.
pub fn current_heap() -> *mut Heap {
    SLOT.with(|slot| {
        let existing = slot.heap.get();
        if !existing.is_null() {
            return existing;
        }
        // Fallback id: unique per thread-local slot, never ORPHAN (it's
        // a heap-allocated, page-aligned address, and ORPHAN is
        // `usize::MAX`).
        let fallback_id = &slot.heap as *const _ as usize;
        let h = heap::new_heap(fallback_id);
        slot.heap.set(h);
        h
    })
}

/// Runs the heap finalizer for the current thread early, without waiting
/// for TLS teardown. Exposed for hosts whose thread-exit hook fires
/// before TLS destructors would otherwise run. Safe to call more than
/// once; a second call is a no-op since the slot is left null afterward
/// the first successful attach check — callers must not allocate again
/// on this thread afterward without a fresh `attach`.
pub fn detach() {
    SLOT.with(|slot| {
        let heap = slot.heap.replace(std::ptr::null_mut());
        if !heap.is_null() {
            unsafe { (*heap).finalize() };
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_is_idempotent() {
        attach(ThreadId(12345));
        let h1 = current_heap();
        attach(ThreadId(99999)); // ignored: already attached
        let h2 = current_heap();
        assert_eq!(h1, h2);
        detach();
    }
}
