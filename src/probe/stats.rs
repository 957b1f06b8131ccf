//! Per-location probe statistics.
//!
//! Counters are updated from the dispatch path with relaxed atomics; they are
//! diagnostics only and never drive a correctness decision.

use core::sync::atomic::{AtomicU64, Ordering};

/// Statistics for one watched location.
#[derive(Debug)]
pub struct ProbeStats {
    /// Entries observed while the location was active.
    hits: AtomicU64,
    /// Entries that matched the target and armed an exit.
    armed: AtomicU64,
    /// Matching entries that could not be armed (table full, allocation).
    missed: AtomicU64,
    /// Armed contexts released without reaching the exit.
    reaped: AtomicU64,
    /// Exits completed for armed invocations.
    completed: AtomicU64,
    /// Total entry-to-exit time of completed invocations.
    total_ns: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl ProbeStats {
    /// Create a new stats instance.
    pub const fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            armed: AtomicU64::new(0),
            missed: AtomicU64::new(0),
            reaped: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
        }
    }

    /// Record an entry on an active location.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a matching entry that armed its exit.
    pub fn record_armed(&self) {
        self.armed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a matching entry that could not be armed.
    pub fn record_missed(&self) {
        self.missed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record `count` contexts released without reaching their exit.
    pub fn record_reaped(&self, count: u64) {
        self.reaped.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a completed armed invocation and its entry-to-exit latency.
    pub fn record_completed(&self, duration_ns: u64) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(duration_ns, Ordering::Relaxed);

        let mut current_min = self.min_ns.load(Ordering::Relaxed);
        while duration_ns < current_min {
            match self.min_ns.compare_exchange_weak(
                current_min,
                duration_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => current_min = x,
            }
        }

        let mut current_max = self.max_ns.load(Ordering::Relaxed);
        while duration_ns > current_max {
            match self.max_ns.compare_exchange_weak(
                current_max,
                duration_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => current_max = x,
            }
        }
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let total_ns = self.total_ns.load(Ordering::Relaxed);
        let min_ns = self.min_ns.load(Ordering::Relaxed);

        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            armed: self.armed.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
            completed,
            total_ns,
            min_ns: if min_ns == u64::MAX { 0 } else { min_ns },
            max_ns: self.max_ns.load(Ordering::Relaxed),
            avg_ns: if completed > 0 { total_ns / completed } else { 0 },
        }
    }
}

impl Default for ProbeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of probe statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub armed: u64,
    pub missed: u64,
    pub reaped: u64,
    pub completed: u64,
    pub total_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub avg_ns: u64,
}
