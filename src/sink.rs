use crate::ProbeId;

/// `FireSink` receives probe firings from the overflow dispatcher.
///
/// `fire` runs in interrupt context: it must not block, and must not call
/// back into the [`Provider`].
///
/// [`Provider`]: struct.Provider.html
pub trait FireSink: Send + Sync {
    /// Fire `probe`, passing the interrupted kernel and user program counters.
    fn fire(&self, probe: ProbeId, pc: u64, upc: u64);
}
