//! Compile-time-ish tunables.
//!
//! The predecessor's `lib.rs` declared `mod options;` and every other
//! module calls through `option_is_enabled(option_large_os_pages)` /
//! `option_get(option_secure)`, but no `options.rs` was ever checked in —
//! this fills that gap.
//!
//! No environment variable governs core *behavior*; what's allowed here
//! is reading a handful of
//! env vars exactly once, at first use, purely as overrides of built-in
//! defaults — the values are then frozen for the life of the process,
//! same as a compile-time constant would be. Nothing here is re-read on
//! the hot path.

use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Once;

pub struct Options {
    /// Emit debug/trace-level logging at pageblock and superpage
    /// lifecycle transitions.
    pub verbose: AtomicBool,
    /// Print aggregate `Stats` on process exit.
    pub show_stats: AtomicBool,
    /// Hint the page provider to prefer large OS pages for superpage
    /// mappings where the platform supports it. The provider may ignore
    /// this; it is advisory only — provider failures are fatal, but
    /// falling back to regular pages on an unmet large-page request is
    /// not a failure.
    pub large_os_pages: AtomicBool,
    /// Bounded capacity of each per-thread inactive pageblock cache
    ///. Kept as a runtime
    /// option rather than a `const` purely so tests can shrink it to
    /// exercise the global-list fallback path without allocating
    /// thousands of pageblocks.
    pub inactive_cache_capacity: AtomicUsize,
}

static OPTIONS: Options = Options {
    verbose: AtomicBool::new(false),
    show_stats: AtomicBool::new(false),
    large_os_pages: AtomicBool::new(false),
    inactive_cache_capacity: AtomicUsize::new(4),
};

static INIT: Once = Once::new();

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => v != "0" && !v.eq_ignore_ascii_case("false"),
        Err(_) => default,
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Returns the process-wide options, seeding them from the environment on
/// first call. Safe to call from any thread at any time.
pub fn options() -> &'static Options {
    INIT.call_once(|| {
        OPTIONS
            .verbose
            .store(env_flag("THREADHEAP_VERBOSE", false), Ordering::Relaxed);
        OPTIONS.show_stats.store(
            env_flag("THREADHEAP_SHOW_STATS", false),
            Ordering::Relaxed,
        );
        OPTIONS.large_os_pages.store(
            env_flag("THREADHEAP_LARGE_OS_PAGES", false),
            Ordering::Relaxed,
        );
        OPTIONS.inactive_cache_capacity.store(
            env_usize("THREADHEAP_INACTIVE_CACHE_CAPACITY", 4),
            Ordering::Relaxed,
        );
    });
    &OPTIONS
}

#[inline]
pub fn is_verbose() -> bool {
    options().verbose.load(Ordering::Relaxed)
}

#[inline]
pub fn inactive_cache_capacity() -> usize {
    options().inactive_cache_capacity.load(Ordering::Relaxed)
}
