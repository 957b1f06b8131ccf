//! Clock used to stamp and reap correlation contexts.
//!
//! The kernel build reads the monotonic clock through `axhal`. Every other
//! build reads a manually driven counter instead, so context expiry can be
//! exercised from user space without waiting on real time.

/// Current monotonic time in nanoseconds.
#[cfg(all(not(test), feature = "axhal"))]
#[inline]
pub fn time_ns() -> u64 {
    axhal::time::monotonic_time().as_nanos() as u64
}

#[cfg(any(test, not(feature = "axhal")))]
pub use self::manual::{set_time_ns, time_ns};

#[cfg(any(test, not(feature = "axhal")))]
mod manual {
    use core::sync::atomic::{AtomicU64, Ordering};

    /// Starts at one second.
    static NOW_NS: AtomicU64 = AtomicU64::new(1_000_000_000);

    /// Current value of the manual clock.
    #[inline]
    pub fn time_ns() -> u64 {
        NOW_NS.load(Ordering::Relaxed)
    }

    /// Move the manual clock to `ns`. Contexts armed later are stamped with it.
    pub fn set_time_ns(ns: u64) {
        NOW_NS.store(ns, Ordering::Relaxed);
    }
}
