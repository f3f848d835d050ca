//! Pageblock Layer: slab-style sub-allocation of a superpage chunk into
//! fixed-size slots for one size class.
//!
//! A pageblock is a contiguous run of pages carved from a superpage and
//! dedicated to one object size class. It holds a free-list of fixed-size
//! slots plus a lock-free remote-free stack used by non-owner threads.
//! Slots are exactly one of {in-use, on the local free list, on the
//! remote garbage stack, in the unallocated tail} — the four sets are
//! disjoint and sum to `slot_count`.

use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::buddy::{Superpage, PAGE_SHIFT, PAGE_SIZE};

/// Reserved owning-thread id meaning "no live owner; up for adoption"
///.
pub const ORPHAN: usize = usize::MAX;

/// Smallest and largest pageblock sizes, bounding
/// `compute_pageblock_size`.
pub const MIN_PAGEBLOCK_PAGES: usize = 1;
pub const MAX_PAGEBLOCK_PAGES: usize = 64; // 256 KiB at a 4 KiB page size

/// Picks a pageblock size (in pages, a power of two) for a size class,
/// aiming to fit ~1024 objects where the bounds allow.
pub fn compute_pageblock_pages(object_size: usize) -> usize {
    let target_bytes = object_size.saturating_mul(1024).max(PAGE_SIZE);
    let mut pages = (target_bytes + PAGE_SIZE - 1) / PAGE_SIZE;
    pages = pages.next_power_of_two().max(MIN_PAGEBLOCK_PAGES);
    pages.min(MAX_PAGEBLOCK_PAGES)
}

/// The garbage-stack head: a versioned (slot_index, count) pair packed
/// with the owning thread id into one 64-bit word, CAS-updated by remote
/// frees.
///
/// Layout (64-bit word): bits 0..20 = 1-based slot index (0 = empty
/// stack), bits 20..40 = push counter (ABA guard), bits 40..64 are spare
/// (owning thread id is stored as a separate field, not packed into this
/// word — see `Pageblock::owner_and_garbage`).
const SLOT_BITS: u32 = 20;
const SLOT_MASK: u64 = (1 << SLOT_BITS) - 1;

fn pack(slot_one_based: u32, count: u32) -> u64 {
    (slot_one_based as u64 & SLOT_MASK) | ((count as u64) << SLOT_BITS)
}

fn unpack(word: u64) -> (u32, u32) {
    ((word & SLOT_MASK) as u32, (word >> SLOT_BITS) as u32)
}

/// Packed `(owning_thread_id, garbage_head)` state. Kept as two
/// atomics rather than one combined 128-bit word: the owning-thread
/// transition (local -> orphan -> adopted) and the garbage-stack push are
/// synchronized independently — an orphan CAS never needs to preserve a
/// concurrently-changing garbage count, and a remote push never needs to
/// touch the owner field except to detect ORPHAN.
pub struct OwnerAndGarbage {
    owner: AtomicU64,
    garbage: AtomicU64,
}

impl OwnerAndGarbage {
    fn new(owner: usize) -> Self {
        OwnerAndGarbage {
            owner: AtomicU64::new(owner as u64),
            garbage: AtomicU64::new(pack(0, 0)),
        }
    }

    pub fn owner(&self) -> usize {
        self.owner.load(Ordering::Acquire) as usize
    }

    pub fn set_owner(&self, id: usize) {
        self.owner.store(id as u64, Ordering::Release);
    }

    /// CAS the owner from `expected` to `to`. Used both for orphaning
    /// (owner -> ORPHAN) and adoption (ORPHAN -> new owner).
    pub fn cas_owner(&self, expected: usize, to: usize) -> bool {
        self.owner
            .compare_exchange(
                expected as u64,
                to as u64,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Pushes `slot_index` (0-based) onto the garbage stack. Returns the
    /// owner observed at the time of the push, so the caller can detect a
    /// race with orphaning and switch to adoption if it sees `ORPHAN`.
    pub fn push_garbage(&self, slot_index: usize, next: &AtomicU64) -> usize {
        loop {
            let owner = self.owner.load(Ordering::Acquire) as usize;
            let cur = self.garbage.load(Ordering::Acquire);
            let (cur_slot, cur_count) = unpack(cur);
            next.store(pack_next(cur_slot), Ordering::Relaxed);
            let fresh = pack((slot_index as u32) + 1, cur_count.wrapping_add(1));
            if self
                .garbage
                .compare_exchange(cur, fresh, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return owner;
            }
        }
    }

    /// Atomically swaps the entire garbage stack out for empty, returning
    /// the 1-based head slot index (0 = was empty).
    pub fn take_garbage(&self) -> u32 {
        let prev = self.garbage.swap(pack(0, 0), Ordering::AcqRel);
        let (slot, _count) = unpack(prev);
        slot
    }
}

fn pack_next(slot_one_based: u32) -> u64 {
    slot_one_based as u64
}

fn unpack_next(word: u64) -> u32 {
    word as u32
}

/// Bookkeeping for one run of pages sub-allocated into equal-sized slots
/// of one size class.
pub struct Pageblock {
    pub superpage: *mut Superpage,
    pub chunk_base: *mut u8,
    pub order: usize,

    pub next: *mut Pageblock,
    pub prev: *mut Pageblock,

    /// 1-based index of the head of the locally reclaimed slot list (0 =
    /// empty).
    freed: u32,
    /// 1-based index of the next never-used slot.
    unallocated: u32,

    pub heap_table: *mut (),

    pub object_size: usize,
    pub slot_count: u32,
    pub free_count: u32,

    owner_garbage: OwnerAndGarbage,
}

unsafe impl Send for Pageblock {}

/// Per-slot `next` link for both the local free list and the remote
/// garbage stack, stored in the slot's own first machine word. This link
/// is a plain pointer-sized integer, not XOR-encoded against a
/// per-pageblock cookie — use-after-free hardening is out of scope here
/// (see `DESIGN.md`).
fn slot_next_cell(mem_pool: *mut u8, object_size: usize, slot_one_based: u32) -> *const AtomicU64 {
    let index = (slot_one_based - 1) as usize;
    unsafe { mem_pool.add(index * object_size) as *const AtomicU64 }
}

impl Pageblock {
    /// Initializes (or re-initializes, on reuse for a possibly different
    /// class) the slot geometry of a freshly carved chunk.
    pub fn init(
        &mut self,
        superpage: *mut Superpage,
        chunk_base: *mut u8,
        order: usize,
        object_size: usize,
        owner: usize,
        heap_table: *mut (),
    ) {
        let chunk_bytes = PAGE_SIZE << order;
        let slot_count = (chunk_bytes / object_size) as u32;
        self.superpage = superpage;
        self.chunk_base = chunk_base;
        self.order = order;
        self.next = ptr::null_mut();
        self.prev = ptr::null_mut();
        self.freed = 0;
        self.unallocated = 1;
        self.heap_table = heap_table;
        self.object_size = object_size;
        self.slot_count = slot_count;
        self.free_count = slot_count;
        self.owner_garbage = OwnerAndGarbage::new(owner);
    }

    pub fn owner(&self) -> usize {
        self.owner_garbage.owner()
    }

    pub fn set_owner(&self, id: usize) {
        self.owner_garbage.set_owner(id);
    }

    pub fn cas_owner(&self, expected: usize, to: usize) -> bool {
        self.owner_garbage.cas_owner(expected, to)
    }

    pub fn mem_pool(&self) -> *mut u8 {
        self.chunk_base
    }

    fn slot_addr(&self, slot_one_based: u32) -> *mut u8 {
        let index = (slot_one_based - 1) as usize;
        unsafe { self.mem_pool().add(index * self.object_size) }
    }

    /// Returns the slot index (0-based) for an address known to lie
    /// within this pageblock's chunk.
    pub fn slot_index_of(&self, addr: *const u8) -> usize {
        let offset = addr as usize - self.mem_pool() as usize;
        offset / self.object_size
    }

    /// Pops one slot for allocation: from the local freed list if
    /// non-empty, else from the never-used tail. Returns `None` if the pageblock has no free
    /// slots at all (caller must have already checked/garbage-collected).
    pub fn acquire_slot(&mut self) -> Option<*mut u8> {
        if self.freed != 0 {
            let slot = self.freed;
            let cell = slot_next_cell(self.mem_pool(), self.object_size, slot);
            self.freed = unpack_next(unsafe { (*cell).load(Ordering::Relaxed) });
            self.free_count -= 1;
            return Some(self.slot_addr(slot));
        }
        if (self.unallocated as usize) <= self.slot_count as usize {
            let slot = self.unallocated;
            self.unallocated += 1;
            self.free_count -= 1;
            return Some(self.slot_addr(slot));
        }
        None
    }

    /// True if this pageblock currently has an immediately-servable slot
    ///.
    pub fn has_free_slot(&self) -> bool {
        self.freed != 0 || (self.unallocated as usize) <= self.slot_count as usize
    }

    /// Prepends `addr` to the local free list. Caller must already own
    /// this pageblock.
    ///
    /// # Safety
    /// `addr` must be a slot address within this pageblock that is
    /// currently in use (not already on a free list).
    pub unsafe fn local_free(&mut self, addr: *mut u8) {
        let slot = (self.slot_index_of(addr) + 1) as u32;
        let cell = slot_next_cell(self.mem_pool(), self.object_size, slot);
        (*cell).store(pack_next(self.freed), Ordering::Relaxed);
        self.freed = slot;
        self.free_count += 1;
    }

    /// Pushes `addr` onto the remote garbage stack for the owning thread
    /// to sweep later. Returns the
    /// owner id observed during the push (may be `ORPHAN`).
    ///
    /// # Safety
    /// `addr` must be a slot address within this pageblock that is
    /// currently in use.
    pub unsafe fn remote_free(&self, addr: *mut u8) -> usize {
        let index = self.slot_index_of(addr);
        let cell = slot_next_cell(self.mem_pool(), self.object_size, (index + 1) as u32);
        self.owner_garbage.push_garbage(index, &*cell)
    }

    /// Sweeps the remote garbage stack onto the local free list
    ///. Returns the number of slots
    /// absorbed.
    pub fn collect_garbage(&mut self) -> u32 {
        let head = self.owner_garbage.take_garbage();
        if head == 0 {
            return 0;
        }
        let mut count = 0u32;
        let mut cur = head;
        loop {
            let cell = slot_next_cell(self.mem_pool(), self.object_size, cur);
            let next = unpack_next(unsafe { (*cell).load(Ordering::Acquire) });
            count += 1;
            if next == 0 {
                // splice the whole recovered chain onto the front of the
                // local freed list in one step.
                unsafe { (*cell).store(pack_next(self.freed), Ordering::Relaxed) };
                break;
            }
            cur = next;
        }
        self.freed = head;
        self.free_count += count;
        count
    }

    /// True once every slot is accounted as free. Does not itself collect remote garbage —
    /// callers must `collect_garbage` first if they want an up to date
    /// answer.
    pub fn is_fully_free(&self) -> bool {
        self.free_count == self.slot_count
    }

    pub fn in_use_count(&self) -> u32 {
        self.slot_count - self.free_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::provider;
    use std::ptr;

    fn fresh_block(object_size: usize) -> (Box<Pageblock>, *mut u8) {
        let order = 0usize;
        let chunk = provider().map(PAGE_SIZE << order).unwrap();
        let mut pb = Box::new(Pageblock {
            superpage: ptr::null_mut(),
            chunk_base: ptr::null_mut(),
            order: 0,
            next: ptr::null_mut(),
            prev: ptr::null_mut(),
            freed: 0,
            unallocated: 1,
            heap_table: ptr::null_mut(),
            object_size,
            slot_count: 0,
            free_count: 0,
            owner_garbage: OwnerAndGarbage::new(0),
        });
        pb.init(ptr::null_mut(), chunk, order, object_size, 1, ptr::null_mut());
        (pb, chunk)
    }

    #[test]
    fn round_trip_returns_most_recent_slot() {
        let (mut pb, chunk) = fresh_block(64);
        let p = pb.acquire_slot().unwrap();
        unsafe { pb.local_free(p) };
        let q = pb.acquire_slot().unwrap();
        assert_eq!(p, q);
        unsafe { provider().unmap(chunk, PAGE_SIZE) };
    }

    #[test]
    fn accounting_sums_to_slot_count() {
        let (mut pb, chunk) = fresh_block(64);
        let slot_count = pb.slot_count;
        let mut live = Vec::new();
        for _ in 0..slot_count {
            live.push(pb.acquire_slot().unwrap());
        }
        assert!(pb.acquire_slot().is_none());
        assert_eq!(pb.in_use_count(), slot_count);
        for (i, p) in live.into_iter().enumerate() {
            unsafe { pb.local_free(p) };
            assert_eq!(pb.free_count, (i as u32) + 1);
        }
        assert!(pb.is_fully_free());
        unsafe { provider().unmap(chunk, PAGE_SIZE) };
    }

    #[test]
    fn remote_free_then_collect_recycles_slot() {
        let (mut pb, chunk) = fresh_block(32);
        let p = pb.acquire_slot().unwrap();
        let owner = unsafe { pb.remote_free(p) };
        assert_eq!(owner, 1);
        assert!(!pb.has_free_slot());
        let recovered = pb.collect_garbage();
        assert_eq!(recovered, 1);
        let q = pb.acquire_slot().unwrap();
        assert_eq!(p, q);
        unsafe { provider().unmap(chunk, PAGE_SIZE) };
    }

    #[test]
    fn remote_free_reports_orphan() {
        let (_pb, chunk) = fresh_block(32);
        let pb2 = OwnerAndGarbage::new(ORPHAN);
        let cell = AtomicU64::new(0);
        let owner = pb2.push_garbage(0, &cell);
        assert_eq!(owner, ORPHAN);
        unsafe { provider().unmap(chunk, PAGE_SIZE) };
    }

    #[test]
    fn pageblock_size_targets_roughly_1024_objects_within_bounds() {
        assert_eq!(compute_pageblock_pages(16), MIN_PAGEBLOCK_PAGES.max(4));
        assert!(compute_pageblock_pages(1 << 30) <= MAX_PAGEBLOCK_PAGES);
    }
}
