//! Simulated counter hardware and collaborator doubles.
//!
//! [`SimPlatform`] models `ncpus` CPUs with `ncounters` counters each and
//! implements both [`EventCatalog`] and [`Backend`]. Events are fed in with
//! [`SimPlatform::advance`], which returns the overflow bitmap a real PMU
//! would raise; pass it to [`Provider::overflow`].
//!
//! [`Provider::overflow`]: ../struct.Provider.html#method.overflow

use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};

use crate::backend::{Backend, CounterRequest, Programmed, ProgrammedSet};
use crate::catalog::{Capabilities, EventCatalog, MaskKind, StaticCatalog};
use crate::consumer::{CounterConsumer, Sampler};
use crate::cpu::Preempt;
use crate::error::Cause;
use crate::sink::FireSink;
use crate::{CpuId, ProbeId};

#[derive(Debug, Clone)]
struct SimCounter {
    request: CounterRequest,
    value: u64,
}

#[derive(Debug)]
struct SimCpu {
    counters: Vec<Option<SimCounter>>,
    running: bool,
}

/// A homogeneous multi-CPU machine with overflow-interrupting counters.
///
/// Requests are placed on counters from the highest index down, so a probe's
/// counter generally differs from its slot.
#[derive(Debug)]
pub struct SimPlatform {
    catalog: StaticCatalog,
    ncounters: usize,
    cpus: Vec<spin::Mutex<SimCpu>>,
    fail_in: AtomicUsize,
    programs: AtomicUsize,
}

impl SimPlatform {
    /// A machine with precise overflow attribution, unit masks and only the
    /// generic events.
    pub fn new(ncpus: usize, ncounters: usize) -> Self {
        Self {
            catalog: StaticCatalog::new(&[], Self::precise(), MaskKind::Umask),
            ncounters,
            cpus: (0..ncpus)
                .map(|_| {
                    spin::Mutex::new(SimCpu {
                        counters: vec![None; ncounters],
                        running: false,
                    })
                })
                .collect(),
            fail_in: AtomicUsize::new(0),
            programs: AtomicUsize::new(0),
        }
    }

    fn precise() -> Capabilities {
        Capabilities {
            overflow_interrupt: true,
            precise_overflow_attribution: true,
        }
    }

    /// Add platform events to the catalog.
    pub fn with_events(self, events: &[&str]) -> Self {
        Self {
            catalog: StaticCatalog::new(
                events,
                self.catalog.capabilities(),
                self.catalog.supported_mask_kind(),
            ),
            ..self
        }
    }

    /// Replace the overflow capabilities.
    pub fn with_capabilities(self, caps: Capabilities) -> Self {
        let events = self.catalog.list_events();
        let events: Vec<&str> = events.iter().map(String::as_str).collect();
        Self {
            catalog: StaticCatalog::new(&events, caps, self.catalog.supported_mask_kind()),
            ..self
        }
    }

    /// Replace the sub-event mask kind.
    pub fn with_mask_kind(self, mask_kind: MaskKind) -> Self {
        let events = self.catalog.list_events();
        let events: Vec<&str> = events.iter().map(String::as_str).collect();
        Self {
            catalog: StaticCatalog::new(&events, self.catalog.capabilities(), mask_kind),
            ..self
        }
    }

    /// Let the next `n` programming calls succeed and fail the one after.
    pub fn fail_programming_after(&self, n: usize) {
        self.fail_in.store(n + 1, Ordering::SeqCst);
    }

    fn should_fail(&self) -> bool {
        loop {
            let left = self.fail_in.load(Ordering::SeqCst);
            if left == 0 {
                return false;
            }
            if self
                .fail_in
                .compare_exchange(left, left - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return left == 1;
            }
        }
    }

    /// Count `n` occurrences of `event` on `cpu` and return the bitmap of
    /// counters that overflowed. Overflowed counters reload their preset.
    pub fn advance(&self, cpu: CpuId, event: &str, n: u64) -> u64 {
        let mut c = match self.cpus.get(cpu) {
            Some(c) => c.lock(),
            None => return 0,
        };
        if !c.running {
            return 0;
        }

        let mut bitmap = 0;
        for (i, slot) in c.counters.iter_mut().enumerate() {
            if let Some(ctr) = slot {
                if ctr.request.event != event {
                    continue;
                }
                let (v, overflowed) = ctr.value.overflowing_add(n);
                if overflowed {
                    bitmap |= 1 << i;
                    ctr.value = ctr.request.preset.wrapping_add(v);
                } else {
                    ctr.value = v;
                }
            }
        }
        bitmap
    }

    fn with_counter<T>(
        &self,
        cpu: CpuId,
        probe: ProbeId,
        f: impl Fn(usize, &SimCounter) -> T,
    ) -> Option<T> {
        let c = self.cpus.get(cpu)?.lock();
        c.counters.iter().enumerate().find_map(|(i, s)| match s {
            Some(ctr) if ctr.request.probe == probe => Some(f(i, ctr)),
            _ => None,
        })
    }

    /// Events left before `probe`'s counter on `cpu` overflows.
    pub fn countdown(&self, cpu: CpuId, probe: ProbeId) -> Option<u64> {
        self.with_counter(cpu, probe, |_, c| 0u64.wrapping_sub(c.value))
    }

    /// The physical counter `probe` occupies on `cpu`.
    pub fn counter_of(&self, cpu: CpuId, probe: ProbeId) -> Option<usize> {
        self.with_counter(cpu, probe, |i, _| i)
    }

    /// The request `probe`'s counter on `cpu` was programmed from.
    pub fn request_of(&self, cpu: CpuId, probe: ProbeId) -> Option<CounterRequest> {
        self.with_counter(cpu, probe, |_, c| c.request.clone())
    }

    /// Probes programmed on `cpu`, by counter index.
    pub fn programmed(&self, cpu: CpuId) -> Vec<ProbeId> {
        match self.cpus.get(cpu) {
            Some(c) => c
                .lock()
                .counters
                .iter()
                .filter_map(|s| s.as_ref().map(|c| c.request.probe))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Returns true if `cpu`'s counters are running.
    pub fn is_running(&self, cpu: CpuId) -> bool {
        self.cpus.get(cpu).map_or(false, |c| c.lock().running)
    }

    /// Number of successful programming calls.
    pub fn program_count(&self) -> usize {
        self.programs.load(Ordering::SeqCst)
    }
}

impl EventCatalog for SimPlatform {
    fn list_events(&self) -> Vec<String> {
        self.catalog.list_events()
    }

    fn capabilities(&self) -> Capabilities {
        self.catalog.capabilities()
    }

    fn supported_mask_kind(&self) -> MaskKind {
        self.catalog.supported_mask_kind()
    }

    fn supports(&self, event: &str) -> bool {
        self.catalog.supports(event)
    }
}

impl Backend for SimPlatform {
    fn ncounters(&self) -> usize {
        self.ncounters
    }

    fn assign_and_program(
        &self,
        cpu: CpuId,
        requests: &[CounterRequest],
    ) -> Result<ProgrammedSet, Cause> {
        let slot = self.cpus.get(cpu).ok_or("no such cpu")?;
        if self.should_fail() {
            return Err("simulated programming failure".into());
        }
        if requests.len() > self.ncounters {
            return Err(format!("{} requests for {} counters", requests.len(), self.ncounters).into());
        }
        if let Some(r) = requests.iter().find(|r| !self.catalog.supports(&r.event)) {
            return Err(format!("event {} not supported", r.event).into());
        }

        let mut c = slot.lock();
        for ctr in c.counters.iter_mut() {
            *ctr = None;
        }

        let mut entries = Vec::with_capacity(requests.len());
        for (i, r) in requests.iter().enumerate() {
            let counter = self.ncounters - 1 - i;
            c.counters[counter] = Some(SimCounter {
                request: r.clone(),
                value: r.preset,
            });
            entries.push(Programmed {
                request: r.clone(),
                counter,
                value: r.preset,
            });
        }
        c.running = true;

        self.programs.fetch_add(1, Ordering::SeqCst);
        Ok(ProgrammedSet::new(entries))
    }

    fn stop(&self, cpu: CpuId, set: &mut ProgrammedSet) {
        let mut c = match self.cpus.get(cpu) {
            Some(c) => c.lock(),
            None => return,
        };
        c.running = false;

        for e in set.entries_mut() {
            if let Some(Some(ctr)) = c.counters.get(e.counter) {
                if ctr.request.probe == e.request.probe {
                    e.value = ctr.value;
                }
            }
        }
        for ctr in c.counters.iter_mut() {
            *ctr = None;
        }
    }
}

/// A [`FireSink`] that records every firing.
///
/// Recording pushes onto a vector, which a real interrupt-context sink must
/// not do.
#[derive(Debug, Default)]
pub struct RecordingSink {
    fires: spin::Mutex<Vec<(ProbeId, u64, u64)>>,
}

impl RecordingSink {
    /// Fired probe ids, oldest first.
    pub fn fired(&self) -> Vec<ProbeId> {
        self.fires.lock().iter().map(|f| f.0).collect()
    }

    /// Fired probes with their kernel and user program counters.
    pub fn fires(&self) -> Vec<(ProbeId, u64, u64)> {
        self.fires.lock().clone()
    }

    /// Forget recorded firings.
    pub fn clear(&self) {
        self.fires.lock().clear();
    }
}

impl FireSink for RecordingSink {
    fn fire(&self, probe: ProbeId, pc: u64, upc: u64) {
        self.fires.lock().push((probe, pc, upc));
    }
}

/// A [`Sampler`] counting suspend and resume calls.
#[derive(Debug, Default)]
pub struct CountingSampler {
    suspends: AtomicUsize,
    resumes: AtomicUsize,
}

impl CountingSampler {
    /// Number of `suspend` calls.
    pub fn suspends(&self) -> usize {
        self.suspends.load(Ordering::SeqCst)
    }

    /// Number of `resume` calls.
    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    /// Returns true between a `suspend` and its `resume`.
    pub fn is_suspended(&self) -> bool {
        self.suspends() > self.resumes()
    }
}

impl Sampler for CountingSampler {
    fn suspend(&self) {
        self.suspends.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A [`CounterConsumer`] that can be switched on and off.
#[derive(Debug, Default)]
pub struct SwitchConsumer {
    active: AtomicBool,
    invalidations: AtomicUsize,
}

impl SwitchConsumer {
    /// Make the consumer own (or stop owning) the counters.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Number of `invalidate_all` calls.
    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

impl CounterConsumer for SwitchConsumer {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn invalidate_all(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

/// A [`Preempt`] tracking the preemption-disable depth.
#[derive(Debug, Default)]
pub struct CountingPreempt {
    depth: AtomicIsize,
    disables: AtomicUsize,
}

impl CountingPreempt {
    /// Current nesting depth; zero when preemption is enabled.
    pub fn depth(&self) -> isize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Number of `disable` calls.
    pub fn disables(&self) -> usize {
        self.disables.load(Ordering::SeqCst)
    }
}

impl Preempt for CountingPreempt {
    fn disable(&self) {
        self.disables.fetch_add(1, Ordering::SeqCst);
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    fn enable(&self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Mode;

    fn request(probe: u64, event: &str, preset: u64) -> CounterRequest {
        CounterRequest {
            probe: probe_id(probe),
            event: event.to_string(),
            mode: Mode::ALL,
            preset,
            attrs: Vec::new(),
        }
    }

    fn probe_id(n: u64) -> ProbeId {
        ProbeId::from_raw(n)
    }

    #[test]
    fn test_advance_overflows_and_reloads() {
        let hw = SimPlatform::new(1, 2);
        let set = hw
            .assign_and_program(0, &[request(1, "PAPI_tot_cyc", 0u64.wrapping_sub(100))])
            .unwrap();
        let id = set.entries()[0].request.probe;

        assert_eq!(set.entries()[0].counter, 1);
        assert_eq!(hw.advance(0, "PAPI_tot_cyc", 60), 0);
        assert_eq!(hw.countdown(0, id), Some(40));
        assert_eq!(hw.advance(0, "PAPI_tot_ins", 60), 0);
        assert_eq!(hw.advance(0, "PAPI_tot_cyc", 50), 0b10);
        assert_eq!(hw.countdown(0, id), Some(90));
    }

    #[test]
    fn test_stop_saves_values() {
        let hw = SimPlatform::new(1, 2);
        let mut set = hw
            .assign_and_program(0, &[request(1, "PAPI_tot_cyc", 0u64.wrapping_sub(100))])
            .unwrap();
        hw.advance(0, "PAPI_tot_cyc", 30);

        hw.stop(0, &mut set);
        assert!(!hw.is_running(0));
        assert_eq!(0u64.wrapping_sub(set.entries()[0].value), 70);
        assert_eq!(hw.advance(0, "PAPI_tot_cyc", 1000), 0);

        // A second stop of an already stopped set keeps the saved value.
        hw.stop(0, &mut set);
        assert_eq!(0u64.wrapping_sub(set.entries()[0].value), 70);
    }

    #[test]
    fn test_forced_failure_leaves_counters() {
        let hw = SimPlatform::new(1, 2);
        hw.assign_and_program(0, &[request(1, "PAPI_tot_cyc", 0)])
            .unwrap();

        hw.fail_programming_after(1);
        assert!(hw.assign_and_program(0, &[request(1, "PAPI_tot_cyc", 0)]).is_ok());
        assert!(hw.assign_and_program(0, &[request(2, "PAPI_tot_ins", 0)]).is_err());
        assert_eq!(hw.programmed(0).len(), 1);
        assert!(hw.assign_and_program(0, &[request(2, "PAPI_tot_ins", 0)]).is_ok());
        assert_eq!(hw.program_count(), 3);
    }

    #[test]
    fn test_rejects_oversized_sets() {
        let hw = SimPlatform::new(1, 1);
        let reqs = [request(1, "PAPI_tot_cyc", 0), request(2, "PAPI_tot_ins", 0)];
        assert!(hw.assign_and_program(0, &reqs).is_err());
    }
}
