//! Allocator statistics, expanded from the predecessor's `StatCount` /
//! `StatCounter` / `Stats` but grounded on the same shape: atomic
//! allocated/freed/peak/current counters, merged from per-thread `Tld`
//! into a process-wide total when a thread exits.

use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Default)]
pub struct StatCount {
    pub allocated: AtomicI64,
    pub freed: AtomicI64,
    pub peak: AtomicI64,
    pub current: AtomicI64,
}

impl StatCount {
    pub const fn new() -> Self {
        StatCount {
            allocated: AtomicI64::new(0),
            freed: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            current: AtomicI64::new(0),
        }
    }

    pub fn update(&self, amount: i64) {
        if amount == 0 {
            return;
        }
        let current = self.current.fetch_add(amount, Ordering::Relaxed) + amount;
        self.peak.fetch_max(current, Ordering::Relaxed);
        if amount > 0 {
            self.allocated.fetch_add(amount, Ordering::Relaxed);
        } else {
            self.freed.fetch_add(-amount, Ordering::Relaxed);
        }
    }

    pub fn increase(&self, amount: i64) {
        self.update(amount);
    }

    pub fn decrease(&self, amount: i64) {
        self.update(-amount);
    }

    fn merge_from(&self, other: &StatCount) {
        self.allocated
            .fetch_add(other.allocated.load(Ordering::Relaxed), Ordering::Relaxed);
        self.freed
            .fetch_add(other.freed.load(Ordering::Relaxed), Ordering::Relaxed);
        let merged_current = self.current.fetch_add(
            other.current.load(Ordering::Relaxed),
            Ordering::Relaxed,
        ) + other.current.load(Ordering::Relaxed);
        self.peak.fetch_max(merged_current, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub struct StatCounter {
    pub total: AtomicI64,
    pub count: AtomicI64,
}

impl StatCounter {
    pub const fn new() -> Self {
        StatCounter {
            total: AtomicI64::new(0),
            count: AtomicI64::new(0),
        }
    }

    pub fn record(&self, amount: i64) {
        self.total.fetch_add(amount, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn merge_from(&self, other: &StatCounter) {
        self.total
            .fetch_add(other.total.load(Ordering::Relaxed), Ordering::Relaxed);
        self.count
            .fetch_add(other.count.load(Ordering::Relaxed), Ordering::Relaxed);
    }
}

/// Per-thread and process-wide statistics. A thread's `Stats` is merged
/// into [`PROCESS_STATS`] on thread exit.
#[derive(Default)]
pub struct Stats {
    pub superpages: StatCount,
    pub pageblocks: StatCount,
    pub reserved_bytes: StatCount,
    pub live_bytes: StatCount,
    pub large_objects: StatCount,
    pub medium_objects: StatCount,
    pub mmap_calls: StatCount,
    pub orphaned: StatCounter,
    pub adopted: StatCounter,
    pub gc_sweeps: StatCounter,
    pub threads: StatCount,
}

impl Stats {
    pub const fn new() -> Self {
        Stats {
            superpages: StatCount::new(),
            pageblocks: StatCount::new(),
            reserved_bytes: StatCount::new(),
            live_bytes: StatCount::new(),
            large_objects: StatCount::new(),
            medium_objects: StatCount::new(),
            mmap_calls: StatCount::new(),
            orphaned: StatCounter::new(),
            adopted: StatCounter::new(),
            gc_sweeps: StatCounter::new(),
            threads: StatCount::new(),
        }
    }

    pub fn merge_from(&self, other: &Stats) {
        self.superpages.merge_from(&other.superpages);
        self.pageblocks.merge_from(&other.pageblocks);
        self.reserved_bytes.merge_from(&other.reserved_bytes);
        self.live_bytes.merge_from(&other.live_bytes);
        self.large_objects.merge_from(&other.large_objects);
        self.medium_objects.merge_from(&other.medium_objects);
        self.mmap_calls.merge_from(&other.mmap_calls);
        self.orphaned.merge_from(&other.orphaned);
        self.adopted.merge_from(&other.adopted);
        self.gc_sweeps.merge_from(&other.gc_sweeps);
        self.threads.merge_from(&other.threads);
    }

    pub fn print(&self) {
        log::info!(
            "superpages: live={} peak={}, pageblocks: live={} peak={}, reserved={}B live={}B, \
             medium: live={} peak={}, large: live={} peak={}, mmap_calls={}, orphaned={} adopted={} gc_sweeps={}",
            self.superpages.current.load(Ordering::Relaxed),
            self.superpages.peak.load(Ordering::Relaxed),
            self.pageblocks.current.load(Ordering::Relaxed),
            self.pageblocks.peak.load(Ordering::Relaxed),
            self.reserved_bytes.current.load(Ordering::Relaxed),
            self.live_bytes.current.load(Ordering::Relaxed),
            self.medium_objects.current.load(Ordering::Relaxed),
            self.medium_objects.peak.load(Ordering::Relaxed),
            self.large_objects.current.load(Ordering::Relaxed),
            self.large_objects.peak.load(Ordering::Relaxed),
            self.mmap_calls.allocated.load(Ordering::Relaxed),
            self.orphaned.count.load(Ordering::Relaxed),
            self.adopted.count.load(Ordering::Relaxed),
            self.gc_sweeps.count.load(Ordering::Relaxed),
        );
    }
}

/// Process-wide aggregate, merged into from each thread's `Tld` on exit.
pub static PROCESS_STATS: Stats = Stats::new();
