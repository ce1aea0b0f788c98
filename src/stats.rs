use std::sync::atomic::{AtomicU64, Ordering};

/// Service counters, updated lock-free and safe to bump from the overflow
/// handler.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    pub(crate) fires: AtomicU64,
    pub(crate) spurious: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) reprograms: AtomicU64,
    pub(crate) rollbacks: AtomicU64,
}

impl Stats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fires: self.fires.load(Ordering::Relaxed),
            spurious: self.spurious.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            reprograms: self.reprograms.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the service counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Probe firings delivered to the sink.
    pub fires: u64,
    /// Overflow interrupts carrying none of our counters.
    pub spurious: u64,
    /// Overflow interrupts ignored because the CPU was not free (inactive,
    /// offline, being reprogrammed or already handling one).
    pub dropped: u64,
    /// Cross-CPU reprogram passes started.
    pub reprograms: u64,
    /// Enablings undone after a programming failure.
    pub rollbacks: u64,
}
