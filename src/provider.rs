use std::convert::TryFrom;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::{Backend, CounterRequest, ProgrammedSet};
use crate::catalog::{EventCatalog, MaskKind};
use crate::consumer::{CounterConsumer, NoConsumer, NoSampler, Sampler};
use crate::cpu::{Cpu, CpuId, NoPreempt, NoPreemptGuard, Preempt};
use crate::error::{new_cause_error, new_error, Error, ErrorKind};
use crate::intr::IntrState;
use crate::registry::{ClientId, Probe, ProbeHandle, ProbeId, Registry};
use crate::sink::FireSink;
use crate::stats::{Stats, StatsSnapshot};
use crate::table::ActiveTable;
use crate::{Config, ProbeSpec};

/// The external components a [`Provider`] drives.
///
/// The event catalog, backend and fire sink are required. The competing
/// consumer, background sampler and preemption hook default to no-ops.
#[derive(Clone)]
pub struct Collaborators {
    catalog: Arc<dyn EventCatalog>,
    backend: Arc<dyn Backend>,
    sink: Arc<dyn FireSink>,
    consumer: Arc<dyn CounterConsumer>,
    sampler: Arc<dyn Sampler>,
    preempt: Arc<dyn Preempt>,
}

impl Collaborators {
    /// Collaborators with no competing consumer, no background sampler and
    /// no preemption control.
    pub fn new(
        catalog: Arc<dyn EventCatalog>,
        backend: Arc<dyn Backend>,
        sink: Arc<dyn FireSink>,
    ) -> Self {
        Self {
            catalog,
            backend,
            sink,
            consumer: Arc::new(NoConsumer),
            sampler: Arc::new(NoSampler),
            preempt: Arc::new(NoPreempt),
        }
    }

    /// Set the competing counter consumer.
    pub fn with_consumer(self, consumer: Arc<dyn CounterConsumer>) -> Self {
        Self { consumer, ..self }
    }

    /// Set the background sampler suspended while probes are enabled.
    pub fn with_sampler(self, sampler: Arc<dyn Sampler>) -> Self {
        Self { sampler, ..self }
    }

    /// Set the preemption hook used by the reprogramming protocol.
    pub fn with_preempt(self, preempt: Arc<dyn Preempt>) -> Self {
        Self { preempt, ..self }
    }
}

/// Multiplexes probes onto the per-CPU hardware counters.
///
/// Every online CPU runs the same counter program, rebuilt from a shared
/// table of active probes whenever a probe is enabled or disabled. Overflow
/// interrupts are routed back to the probes that own the overflowing
/// counters through [`overflow`].
///
/// `enable`, `disable`, `destroy` and the CPU hooks serialize on one
/// topology lock. `overflow` never takes it.
///
/// [`overflow`]: #method.overflow
pub struct Provider {
    collab: Collaborators,
    min_overflow: u64,
    multi_overflow: bool,
    ovf_mask: u64,
    mask_kind: MaskKind,
    registry: Registry,
    table: ActiveTable,
    cpus: Box<[Cpu]>,
    topology: Mutex<()>,
    enablings: AtomicUsize,
    in_use: AtomicBool,
    stats: Stats,
}

impl Provider {
    pub(crate) fn new(config: &Config, collab: Collaborators) -> Result<Self, Error> {
        let caps = collab.catalog.capabilities();
        let ncounters = collab.backend.ncounters();
        if !caps.overflow_interrupt || ncounters == 0 || config.ncpus() == 0 {
            return Err(new_error(ErrorKind::Unsupported));
        }

        let ovf_mask = if ncounters >= 64 {
            u64::MAX
        } else {
            (1u64 << ncounters) - 1
        };
        let mask_kind = collab.catalog.supported_mask_kind();

        log::info!(
            "{} counters per cpu, {} overflow attribution, mask kind {:?}",
            ncounters,
            if caps.precise_overflow_attribution {
                "precise"
            } else {
                "single"
            },
            mask_kind
        );

        Ok(Self {
            min_overflow: config.min_overflow(),
            multi_overflow: caps.precise_overflow_attribution,
            ovf_mask,
            mask_kind,
            registry: Registry::new(),
            table: ActiveTable::new(ncounters),
            cpus: (0..config.ncpus())
                .map(|id| Cpu::new(id, config.starts_online(id)))
                .collect(),
            topology: Mutex::new(()),
            enablings: AtomicUsize::new(0),
            in_use: AtomicBool::new(false),
            stats: Stats::default(),
            collab,
        })
    }

    /// Return the probe `client` created for `spec`, creating it (disabled)
    /// if this is the first request for it.
    ///
    /// ```
    /// # use std::sync::Arc;
    /// use pmcmux::sim::{RecordingSink, SimPlatform};
    /// use pmcmux::{ClientId, Collaborators, Config, Mode, ProbeSpec};
    ///
    /// let hw = Arc::new(SimPlatform::new(1, 4));
    /// let provider = Config::default()
    ///     .build(Collaborators::new(hw.clone(), hw, Arc::new(RecordingSink::default())))?;
    ///
    /// let spec = ProbeSpec::new("PAPI_tot_cyc", Mode::ALL, 10000);
    /// let a = provider.create_probe(ClientId(1), spec.clone())?;
    /// let b = provider.create_probe(ClientId(1), spec)?;
    /// assert_eq!(a.id(), b.id());
    /// assert!(!a.is_enabled());
    /// #
    /// # Ok::<(), pmcmux::error::Error>(())
    /// ```
    pub fn create_probe(&self, client: ClientId, spec: ProbeSpec) -> Result<ProbeHandle, Error> {
        self.registry
            .create(client, spec, self.collab.catalog.as_ref(), self.min_overflow)
    }

    /// Program `probe` on every online CPU.
    ///
    /// Enabling an enabled probe is a no-op. On error nothing has changed:
    /// the slot, enabling count and every CPU's interrupt state are as they
    /// were before the call.
    pub fn enable(&self, probe: &ProbeHandle) -> Result<(), Error> {
        let _topology = self.lock_topology();

        if probe.is_destroyed() {
            return Err(new_error(ErrorKind::Destroyed));
        }
        if probe.is_enabled() {
            return Ok(());
        }
        if self.collab.consumer.is_active() {
            return Err(new_error(ErrorKind::Busy));
        }

        let enablings = self.enablings.load(Ordering::Acquire);
        if !self.multi_overflow && enablings > 0 {
            return Err(new_error(ErrorKind::TooManyEnablings));
        }

        let first = enablings == 0;
        if first {
            self.collab.consumer.invalidate_all();
            self.collab.sampler.suspend();
        }

        // While nothing is enabled every CPU is inactive, so the table can
        // change before ownership is claimed.
        if let Err(e) = self.table.acquire(probe) {
            if first {
                self.collab.sampler.resume();
            }
            return Err(e);
        }
        if first {
            self.claim_all();
        }

        if let Err(e) = self.reprogram(probe) {
            log::warn!("enabling probe {} failed, rolling back: {}", probe.name(), e);
            Stats::bump(&self.stats.rollbacks);
            self.unwind_enable(probe, first);
            return Err(e);
        }

        probe.set_enabled(true);
        self.enablings.fetch_add(1, Ordering::AcqRel);
        log::debug!(
            "enabled probe {} in slot {:?} on counter {:?}",
            probe.name(),
            probe.slot(),
            probe.assigned_counter()
        );
        Ok(())
    }

    fn unwind_enable(&self, probe: &Probe, first: bool) {
        if first {
            self.surrender_all();
            self.stop_all();
            self.table.release(probe);
            self.collab.sampler.resume();
        } else {
            // Put every CPU back on the set it ran before.
            probe.set_disabling(true);
            if let Err(e) = self.reprogram(probe) {
                log::warn!("restoring counters after failed enable: {}", e);
            }
            probe.set_disabling(false);
        }
        probe.set_counter(None);
    }

    /// Remove `probe` from every CPU. Disabling never fails; a disabled probe
    /// is left alone.
    pub fn disable(&self, probe: &ProbeHandle) {
        let _topology = self.lock_topology();

        if !probe.is_enabled() {
            return;
        }

        if self.enablings.load(Ordering::Acquire) == 1 {
            // Last one out: no set to rebuild, just stop and hand back the
            // interrupt.
            self.surrender_all();
            self.stop_all();
            self.table.release(probe);
        } else {
            probe.set_disabling(true);
            if let Err(e) = self.reprogram(probe) {
                log::warn!(
                    "reprogram after disabling probe {} failed: {}",
                    probe.name(),
                    e
                );
            }
            probe.set_disabling(false);
        }

        probe.set_enabled(false);
        probe.set_counter(None);
        if self.enablings.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.collab.sampler.resume();
        }
        log::debug!("disabled probe {}", probe.name());
    }

    /// Forget a disabled probe. Fails with `StillEnabled` if it is enabled.
    ///
    /// Destroying is final: later calls to [`enable`] with the same handle
    /// fail with `Destroyed`, and destroying it again is a no-op.
    ///
    /// [`enable`]: #method.enable
    pub fn destroy(&self, probe: &ProbeHandle) -> Result<(), Error> {
        let _topology = self.lock_topology();

        if probe.is_enabled() {
            return Err(new_error(ErrorKind::StillEnabled));
        }
        probe.set_destroyed();
        if self.registry.remove(probe) {
            log::debug!("destroyed probe {}", probe.name());
        }
        Ok(())
    }

    /// Halt, rebuild and restart the counters of every online CPU from the
    /// active table.
    ///
    /// `changing` is the probe being enabled (already in the table) or, if
    /// marked disabling, the probe being removed.
    fn reprogram(&self, changing: &Probe) -> Result<(), Error> {
        let _preempt = NoPreemptGuard::new(self.collab.preempt.as_ref());
        Stats::bump(&self.stats.reprograms);

        let online: Vec<&Cpu> = self.cpus.iter().filter(|c| c.is_online()).collect();

        // Every CPU must be fenced before any of them is touched.
        let blocked: Vec<&Cpu> = online.iter().copied().filter(|c| c.intr.block()).collect();
        for cpu in online.iter() {
            if let Some(set) = cpu.ctx.lock().as_mut() {
                self.collab.backend.stop(cpu.id, set);
            }
        }
        for cpu in blocked.iter() {
            cpu.intr.release();
        }

        // The counters are stopped, so no overflow can reference the slot.
        if changing.is_disabling() {
            self.table.release(changing);
            changing.set_counter(None);
        }

        for cpu in online.iter() {
            if let Err(e) = self.program_cpu(cpu) {
                log::warn!("cpu {}: {}", cpu.id, e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Build `cpu`'s counter set from the active table and program it,
    /// carrying counts forward from the previous set.
    ///
    /// On failure the previous (stopped) set is kept as the CPU's context.
    fn program_cpu(&self, cpu: &Cpu) -> Result<(), Error> {
        let mut ctx = cpu.ctx.lock();
        let old = ctx.take();

        let probes = self.table.probes();
        if probes.is_empty() {
            return Ok(());
        }

        let requests: Vec<CounterRequest> = probes
            .iter()
            .map(|p| self.request_for(p, old.as_ref()))
            .collect();

        match self.collab.backend.assign_and_program(cpu.id, &requests) {
            Ok(set) => {
                for p in probes.iter() {
                    if let Some(e) = set.find(p.id()) {
                        p.set_counter(Some(e.counter));
                    }
                }
                *ctx = Some(set);
                Ok(())
            }
            Err(cause) => {
                *ctx = old;
                Err(new_cause_error(ErrorKind::ProgrammingFailed, cause))
            }
        }
    }

    fn request_for(&self, probe: &Probe, old: Option<&ProgrammedSet>) -> CounterRequest {
        let spec = probe.spec();

        // A probe already counting keeps its progress towards overflow.
        let carried = if probe.is_enabled() {
            old.and_then(|s| s.find(probe.id())).map(|e| e.value)
        } else {
            None
        };

        let attrs = match (spec.mask, self.mask_kind.attribute()) {
            (Some(mask), Some(attr)) => vec![(attr, mask)],
            _ => Vec::new(),
        };

        CounterRequest {
            probe: probe.id(),
            event: spec.event.clone(),
            mode: spec.mode,
            preset: carried.unwrap_or_else(|| spec.preset()),
            attrs,
        }
    }

    fn claim_all(&self) {
        for cpu in self.cpus.iter() {
            cpu.intr.claim();
        }
        self.in_use.store(true, Ordering::Release);
        log::info!("claimed counter overflow on {} cpus", self.cpus.len());
    }

    fn surrender_all(&self) {
        for cpu in self.cpus.iter() {
            cpu.intr.surrender();
        }
        self.in_use.store(false, Ordering::Release);
        log::info!("released counter overflow on {} cpus", self.cpus.len());
    }

    fn stop_all(&self) {
        for cpu in self.cpus.iter() {
            if let Some(mut set) = cpu.ctx.lock().take() {
                self.collab.backend.stop(cpu.id, &mut set);
            }
        }
    }

    /// Take `cpu` out of service, discarding its counters.
    pub fn on_cpu_offline(&self, cpu: CpuId) -> Result<(), Error> {
        let c = self.cpu(cpu)?;
        let _topology = self.lock_topology();

        if self.enablings.load(Ordering::Acquire) > 0 {
            let blocked = c.intr.block();
            if let Some(mut set) = c.ctx.lock().take() {
                self.collab.backend.stop(c.id, &mut set);
            }
            c.set_online(false);
            if blocked {
                c.intr.release();
            }
        } else {
            c.set_online(false);
        }

        log::debug!("cpu {} offline", cpu);
        Ok(())
    }

    /// Bring `cpu` into service, programming it with the active probes.
    ///
    /// If the joining CPU cannot be programmed it stays online with no
    /// counters and `ProgrammingFailed` is returned. The other CPUs are not
    /// touched.
    pub fn on_cpu_online(&self, cpu: CpuId) -> Result<(), Error> {
        let c = self.cpu(cpu)?;
        let _topology = self.lock_topology();

        let was_online = c.is_online();
        c.set_online(true);
        log::debug!("cpu {} online", cpu);

        if self.enablings.load(Ordering::Acquire) == 0 {
            return Ok(());
        }

        c.intr.claim();
        if was_online && c.ctx.lock().is_some() {
            return Ok(());
        }
        self.program_cpu(c).map_err(|e| {
            log::warn!("cpu {} joined without counters: {}", cpu, e);
            e
        })
    }

    /// Route a counter overflow interrupt on `cpu` to the probes it belongs
    /// to. Returns the number of probes fired.
    ///
    /// Called from interrupt context: this never blocks or allocates. An
    /// interrupt carrying none of our counters, or arriving while `cpu` is
    /// not free, is counted and ignored.
    pub fn overflow(&self, cpu: CpuId, bitmap: u64, pc: u64, upc: u64) -> usize {
        let c = match self.cpus.get(cpu) {
            Some(c) => c,
            None => return 0,
        };
        if !c.intr.enter_handler() {
            Stats::bump(&self.stats.dropped);
            return 0;
        }

        let mut fired = 0;
        if !c.is_online() {
            Stats::bump(&self.stats.dropped);
        } else if bitmap & self.ovf_mask == 0 {
            Stats::bump(&self.stats.spurious);
            log::trace!("cpu {}: overflow {:#x} is not ours", cpu, bitmap);
        } else if self.multi_overflow {
            self.table.try_for_each(|p| {
                let hit = p
                    .assigned_counter()
                    .and_then(counter_bit)
                    .map_or(false, |bit| bitmap & bit != 0);
                if hit {
                    self.collab.sink.fire(p.id(), pc, upc);
                    fired += 1;
                }
                true
            });
        } else {
            // At most one probe can be active.
            self.table.try_for_each(|p| {
                self.collab.sink.fire(p.id(), pc, upc);
                fired += 1;
                false
            });
        }

        self.stats.fires.fetch_add(fired as u64, Ordering::Relaxed);
        c.intr.exit_handler();
        fired
    }

    /// Number of enabled probes.
    pub fn active_enablings(&self) -> usize {
        self.enablings.load(Ordering::Acquire)
    }

    /// Returns true while the provider owns the counter hardware.
    pub fn in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Probe ids per active-table slot.
    pub fn slots(&self) -> Vec<Option<ProbeId>> {
        self.table.ids()
    }

    /// Number of occupied active-table slots.
    pub fn occupied_slots(&self) -> usize {
        self.table.occupied()
    }

    /// Counters per CPU, which is also the number of slots.
    pub fn ncounters(&self) -> usize {
        self.collab.backend.ncounters()
    }

    /// Returns true if the platform can enable several probes at once.
    pub fn multi_overflow_capable(&self) -> bool {
        self.multi_overflow
    }

    /// The interrupt state of `cpu`.
    pub fn intr_state(&self, cpu: CpuId) -> Option<IntrState> {
        self.cpus.get(cpu).map(|c| c.intr.get())
    }

    /// Returns true if `cpu` is in service.
    pub fn is_online(&self, cpu: CpuId) -> bool {
        self.cpus.get(cpu).map_or(false, Cpu::is_online)
    }

    /// Number of probes created and not yet destroyed.
    pub fn probe_count(&self) -> usize {
        self.registry.len()
    }

    /// A copy of the service counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn cpu(&self, cpu: CpuId) -> Result<&Cpu, Error> {
        self.cpus
            .get(cpu)
            .ok_or_else(|| new_error(ErrorKind::UnknownCpu))
    }

    fn lock_topology(&self) -> MutexGuard<'_, ()> {
        self.topology.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The overflow bitmap bit for counter `n`. Counters past the bitmap width
/// have none.
fn counter_bit(n: usize) -> Option<u64> {
    u32::try_from(n).ok().and_then(|n| 1u64.checked_shl(n))
}

impl Drop for Provider {
    fn drop(&mut self) {
        if self.enablings.load(Ordering::Acquire) > 0 {
            self.surrender_all();
            self.stop_all();
            for p in self.table.probes() {
                self.table.release(&p);
                p.set_enabled(false);
                p.set_counter(None);
            }
            self.collab.sampler.resume();
        }
    }
}
