//! Page Provider Interface.
//!
//! Acquires and releases page-aligned virtual ranges. The allocator
//! treats this as an opaque source/sink: `map` returns a page-aligned,
//! zero-initialized range of the requested byte count; `unmap` releases
//! the exact range. Failures to map are recoverable (the caller gets
//! `None` and may return null up the stack); failures to unmap are fatal
//! — the allocator aborts the process rather than continue with
//! metadata it can no longer trust.
//!
//! Carried over from the predecessor's `os.rs`, which wires the same
//! `libc`/`winapi` calls but — being an unfinished transliteration of the
//! C original — mixes in syntax that isn't valid Rust. This version keeps
//! its structure (page-size probing at init, `mmap`/`VirtualAlloc` on the
//! two platform families) but is written as real, sound Rust, and drops
//! the guard-page/decommit/reset machinery this crate's page provider
//! contract doesn't call for (see `DESIGN.md`).

use std::ptr;
use std::sync::Once;

#[cfg(not(windows))]
use libc::{mmap, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE};

#[cfg(windows)]
use winapi::{
    shared::minwindef::LPVOID,
    um::memoryapi::{VirtualAlloc, VirtualFree},
    um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO},
    um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE},
};

use crate::options;
use crate::stats::PROCESS_STATS;

static OS_INIT: Once = Once::new();
static mut OS_PAGE_SIZE: usize = 4096;

fn os_init() {
    OS_INIT.call_once(|| {
        #[cfg(not(windows))]
        unsafe {
            let size = libc::sysconf(libc::_SC_PAGESIZE);
            if size > 0 {
                OS_PAGE_SIZE = size as usize;
            }
        }
        #[cfg(windows)]
        unsafe {
            let mut si: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&mut si);
            if si.dwPageSize > 0 {
                OS_PAGE_SIZE = si.dwPageSize as usize;
            }
        }
    });
}

/// The OS's small page size, probed once at first use.
pub fn os_page_size() -> usize {
    os_init();
    unsafe { OS_PAGE_SIZE }
}

fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) / align * align
}

/// Acquires and releases page-aligned virtual memory ranges. An opaque
/// source/sink from the allocator's point of view.
pub trait PageProvider: Send + Sync {
    /// Returns a page-aligned, zero-initialized range of at least
    /// `bytes` bytes, or `None` on exhaustion.
    fn map(&self, bytes: usize) -> Option<*mut u8>;

    /// Releases exactly the range previously returned by `map` with the
    /// same `bytes`. Caller must ensure `addr`/`bytes` match a prior
    /// `map` call exactly — mismatches are a contract violation
    /// and this function is not expected to detect
    /// them.
    ///
    /// # Safety
    /// `addr` must have been returned by a prior call to `map(bytes)` on
    /// the same provider, and must not have been unmapped already.
    unsafe fn unmap(&self, addr: *mut u8, bytes: usize);
}

/// The real OS-backed provider: `mmap`/`munmap` on Unix,
/// `VirtualAlloc`/`VirtualFree` on Windows.
#[derive(Default)]
pub struct SystemPageProvider;

impl SystemPageProvider {
    pub const fn new() -> Self {
        SystemPageProvider
    }
}

impl PageProvider for SystemPageProvider {
    fn map(&self, bytes: usize) -> Option<*mut u8> {
        if bytes == 0 {
            return None;
        }
        let size = align_up(bytes, os_page_size());
        let _ = options::options(); // ensure env-derived options are seeded

        #[cfg(not(windows))]
        let p = unsafe {
            let flags = MAP_PRIVATE | MAP_ANONYMOUS;
            let prot = PROT_READ | PROT_WRITE;
            let raw = mmap(ptr::null_mut(), size, prot, flags, -1, 0);
            if raw == MAP_FAILED {
                ptr::null_mut()
            } else {
                raw as *mut u8
            }
        };

        #[cfg(windows)]
        let p = unsafe {
            let raw = VirtualAlloc(
                ptr::null_mut(),
                size,
                MEM_RESERVE | MEM_COMMIT,
                PAGE_READWRITE,
            );
            raw as *mut u8
        };

        PROCESS_STATS.mmap_calls.increase(1);
        if p.is_null() {
            log::warn!("page provider: map({}) failed", size);
            None
        } else {
            PROCESS_STATS.reserved_bytes.increase(size as i64);
            Some(p)
        }
    }

    unsafe fn unmap(&self, addr: *mut u8, bytes: usize) {
        if addr.is_null() || bytes == 0 {
            return;
        }
        let size = align_up(bytes, os_page_size());

        #[cfg(not(windows))]
        let ok = munmap(addr as *mut libc::c_void, size) == 0;

        #[cfg(windows)]
        let ok = VirtualFree(addr as LPVOID, 0, MEM_RELEASE) != 0;

        if !ok {
            // Page-provider failures are fatal; the errno is only useful
            // here as a diagnostic attached to the abort message.
            crate::invariant!(false, "unmap failed: addr={:p} size={} errno={}", addr, size, errno::errno());
        }
        PROCESS_STATS.reserved_bytes.decrease(size as i64);
    }
}

/// The process-wide page provider. A trait object rather than a generic
/// parameter threaded through every module: the provider is treated as a
/// single opaque collaborator, not a per-call strategy.
pub fn provider() -> &'static dyn PageProvider {
    static SYSTEM: SystemPageProvider = SystemPageProvider::new();
    &SYSTEM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_returns_zeroed_page_aligned_memory() {
        let p = provider();
        let bytes = 64 * 1024;
        let addr = p.map(bytes).expect("map should succeed");
        assert_eq!((addr as usize) % os_page_size(), 0);
        unsafe {
            for i in 0..bytes {
                assert_eq!(*addr.add(i), 0);
            }
            p.unmap(addr, bytes);
        }
    }

    #[test]
    fn map_zero_bytes_fails() {
        assert!(provider().map(0).is_none());
    }
}
