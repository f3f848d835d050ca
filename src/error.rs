//! Centralizes the allocator's "this is a bug, not recoverable" path.
//!
//! Out-of-memory is the only recoverable fault (surfaced as a null return
//! from the public API); everything else — a corrupt buddy bitmap, a
//! garbage-stack shape mismatch, a free of an unregistered page in a debug
//! build — is an invariant breach and aborts the process with a
//! diagnostic rather than attempting to continue.

use std::fmt;

/// Logs a diagnostic at error level and aborts the process. Never returns.
#[inline(never)]
#[cold]
pub fn abort_with(args: fmt::Arguments<'_>) -> ! {
    log::error!("{}", args);
    std::process::abort();
}

/// Like `assert!`, but always enabled (even in release builds) and aborts
/// through [`abort_with`] instead of unwinding: invariant breaches abort
/// with a diagnostic rather than unwind, since they are not recoverable.
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::error::abort_with(format_args!($($arg)*));
        }
    };
}

/// A debug-only invariant check: compiled out entirely in release builds,
/// used for the expensive consistency checks that are too costly to pay
/// for on every call in a release build (e.g. metadata lookup miss on a
/// supposedly-owned pointer).
#[macro_export]
macro_rules! debug_invariant {
    ($cond:expr, $($arg:tt)*) => {
        #[cfg(debug_assertions)]
        {
            if !($cond) {
                $crate::error::abort_with(format_args!($($arg)*));
            }
        }
    };
}
