//! The contract with the code that programs physical counters.

use crate::error::Cause;
use crate::{CpuId, Mode, ProbeId};

/// A low-level description of one counter a CPU should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterRequest {
    /// The probe this counter belongs to.
    pub probe: ProbeId,
    /// Event to count.
    pub event: String,
    /// Privilege levels to count in.
    pub mode: Mode,
    /// Initial counter value. The counter overflows when it wraps past
    /// `u64::MAX`.
    pub preset: u64,
    /// Named attributes, such as a `umask` or `emask` sub-event selector.
    pub attrs: Vec<(&'static str, u64)>,
}

/// A [`CounterRequest`] placed on a physical counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Programmed {
    /// The request as handed to the backend.
    pub request: CounterRequest,
    /// Physical counter index on the CPU.
    pub counter: usize,
    /// Counter value as of the last program or stop.
    pub value: u64,
}

/// The counters programmed on one CPU.
///
/// A `ProgrammedSet` is the per-CPU counter context: it is kept after the
/// CPU is stopped so the next program can carry counts forward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgrammedSet {
    entries: Vec<Programmed>,
}

impl ProgrammedSet {
    /// Wrap the entries produced by a backend.
    pub fn new(entries: Vec<Programmed>) -> Self {
        Self { entries }
    }

    /// All programmed counters.
    pub fn entries(&self) -> &[Programmed] {
        &self.entries
    }

    /// Mutable access for backends refreshing values on stop.
    pub fn entries_mut(&mut self) -> &mut [Programmed] {
        &mut self.entries
    }

    /// The counter programmed for `probe`, if any.
    pub fn find(&self, probe: ProbeId) -> Option<&Programmed> {
        self.entries.iter().find(|e| e.request.probe == probe)
    }

    /// Number of programmed counters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no counters are programmed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `Backend` translates counter requests into register state.
///
/// The platform is assumed homogeneous: every CPU has the same counters, so a
/// set that programs on one CPU programs on all of them.
pub trait Backend: Send + Sync {
    /// Number of counters on each CPU.
    fn ncounters(&self) -> usize;

    /// Assign each request to a physical counter, program the counters on
    /// `cpu` and start them.
    ///
    /// A failed call must leave `cpu`'s counters untouched.
    fn assign_and_program(
        &self,
        cpu: CpuId,
        requests: &[CounterRequest],
    ) -> Result<ProgrammedSet, Cause>;

    /// Halt the counters on `cpu`, saving each counter's current value into
    /// `set`.
    fn stop(&self, cpu: CpuId, set: &mut ProgrammedSet);
}
