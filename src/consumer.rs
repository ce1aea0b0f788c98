//! Other users of the counter hardware.

/// A competing consumer of the same counters, such as a sampling profiler.
pub trait CounterConsumer: Send + Sync {
    /// Returns true while the consumer owns the counters.
    fn is_active(&self) -> bool;

    /// Discard every lightweight per-thread counter context the consumer
    /// holds.
    fn invalidate_all(&self);
}

/// Background capacity/utilization sampling that must pause while probes
/// own the counters.
pub trait Sampler: Send + Sync {
    /// Called when the first probe is enabled.
    fn suspend(&self);

    /// Called when the last probe is disabled.
    fn resume(&self);
}

/// A [`CounterConsumer`] for platforms with no competing consumer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConsumer;

impl CounterConsumer for NoConsumer {
    fn is_active(&self) -> bool {
        false
    }

    fn invalidate_all(&self) {}
}

/// A [`Sampler`] for platforms without background sampling.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSampler;

impl Sampler for NoSampler {
    fn suspend(&self) {}

    fn resume(&self) {}
}
