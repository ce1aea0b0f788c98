use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::catalog::EventCatalog;
use crate::error::{new_error, Error, ErrorKind};
use crate::ProbeSpec;

const UNASSIGNED: usize = usize::MAX;

/// Opaque identity of a probe, handed to the [`FireSink`] when it fires.
///
/// [`FireSink`]: trait.FireSink.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProbeId(u64);

impl ProbeId {
    #[cfg(test)]
    pub(crate) const fn from_raw(id: u64) -> Self {
        ProbeId(id)
    }

    /// The raw id.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the client creating probes. Identical specifications from the
/// same client share one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u32);

/// A client's demand for an event to be counted.
///
/// Probes are created by [`Provider::create_probe`] and shared through a
/// [`ProbeHandle`].
///
/// [`Provider::create_probe`]: struct.Provider.html#method.create_probe
#[derive(Debug)]
pub struct Probe {
    id: ProbeId,
    client: ClientId,
    spec: ProbeSpec,
    name: String,
    counter: AtomicUsize,
    slot: AtomicUsize,
    enabled: AtomicBool,
    disabling: AtomicBool,
    destroyed: AtomicBool,
}

/// Shared handle to a [`Probe`].
pub type ProbeHandle = Arc<Probe>;

impl Probe {
    /// The id passed to the fire sink.
    pub fn id(&self) -> ProbeId {
        self.id
    }

    /// The client that created this probe.
    pub fn client(&self) -> ClientId {
        self.client
    }

    /// The structured specification.
    pub fn spec(&self) -> &ProbeSpec {
        &self.spec
    }

    /// The canonical probe name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true while the probe is programmed on hardware.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// The physical counter the probe was last programmed on.
    pub fn assigned_counter(&self) -> Option<usize> {
        match self.counter.load(Ordering::Acquire) {
            UNASSIGNED => None,
            c => Some(c),
        }
    }

    /// The active-table slot holding this probe.
    pub fn slot(&self) -> Option<usize> {
        match self.slot.load(Ordering::Acquire) {
            UNASSIGNED => None,
            s => Some(s),
        }
    }

    /// Returns true once the probe has been destroyed. A destroyed probe
    /// cannot be enabled again.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn set_destroyed(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub(crate) fn is_disabling(&self) -> bool {
        self.disabling.load(Ordering::Acquire)
    }

    pub(crate) fn set_disabling(&self, disabling: bool) {
        self.disabling.store(disabling, Ordering::Release);
    }

    pub(crate) fn set_counter(&self, counter: Option<usize>) {
        self.counter
            .store(counter.unwrap_or(UNASSIGNED), Ordering::Release);
    }

    pub(crate) fn set_slot(&self, slot: Option<usize>) {
        self.slot.store(slot.unwrap_or(UNASSIGNED), Ordering::Release);
    }
}

/// Validates specifications and owns every created probe.
#[derive(Debug)]
pub(crate) struct Registry {
    probes: Mutex<HashMap<(ClientId, String), ProbeHandle>>,
    next_id: AtomicU64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            probes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Return the probe `client` already created for `spec`, or create one.
    pub(crate) fn create(
        &self,
        client: ClientId,
        spec: ProbeSpec,
        catalog: &dyn EventCatalog,
        min_overflow: u64,
    ) -> Result<ProbeHandle, Error> {
        validate(&spec, catalog, min_overflow)?;

        let name = spec.to_string();
        let mut probes = self.probes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(p) = probes.get(&(client, name.clone())) {
            return Ok(Arc::clone(p));
        }

        let probe = Arc::new(Probe {
            id: ProbeId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            client,
            spec,
            name: name.clone(),
            counter: AtomicUsize::new(UNASSIGNED),
            slot: AtomicUsize::new(UNASSIGNED),
            enabled: AtomicBool::new(false),
            disabling: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        });
        log::debug!("created probe {} ({})", probe.id, name);

        probes.insert((client, name), Arc::clone(&probe));
        Ok(probe)
    }

    /// Forget `probe`. Returns false if it was not registered.
    pub(crate) fn remove(&self, probe: &Probe) -> bool {
        let mut probes = self.probes.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (probe.client, probe.name.clone());
        match probes.get(&key) {
            Some(p) if p.id == probe.id => probes.remove(&key).is_some(),
            _ => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.probes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn validate(spec: &ProbeSpec, catalog: &dyn EventCatalog, min_overflow: u64) -> Result<(), Error> {
    if !catalog.supports(&spec.event) {
        return Err(new_error(ErrorKind::UnknownEvent));
    }
    if spec.mode.is_empty() {
        return Err(new_error(ErrorKind::InvalidModeCombination));
    }
    if spec.mask.is_some() && !catalog.takes_mask(&spec.event) {
        return Err(new_error(ErrorKind::MaskUnsupported));
    }
    if spec.threshold < min_overflow {
        return Err(new_error(ErrorKind::ThresholdTooLow));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Capabilities, MaskKind, StaticCatalog};
    use crate::Mode;

    fn catalog(mask_kind: MaskKind) -> StaticCatalog {
        StaticCatalog::new(
            &["CYCLES", "INSTRUCTIONS"],
            Capabilities {
                overflow_interrupt: true,
                precise_overflow_attribution: true,
            },
            mask_kind,
        )
    }

    fn create_err(spec: ProbeSpec, mask_kind: MaskKind) -> ErrorKind {
        *Registry::new()
            .create(ClientId(1), spec, &catalog(mask_kind), 5000)
            .unwrap_err()
            .kind()
    }

    #[test]
    fn test_same_spec_same_client_shares_probe() {
        let r = Registry::new();
        let c = catalog(MaskKind::Umask);
        let spec = ProbeSpec::new("CYCLES", Mode::ALL, 10000);

        let a = r.create(ClientId(1), spec.clone(), &c, 5000).unwrap();
        let b = r.create(ClientId(1), spec.clone(), &c, 5000).unwrap();
        let other = r.create(ClientId(2), spec, &c, 5000).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_ne!(a.id(), other.id());
        assert_eq!(r.len(), 2);
        assert!(!a.is_enabled());
        assert!(!a.is_destroyed());
        assert_eq!(a.slot(), None);
        assert_eq!(a.assigned_counter(), None);
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(
            create_err(ProbeSpec::new("BOGUS", Mode::ALL, 10000), MaskKind::Umask),
            ErrorKind::UnknownEvent
        );
        assert_eq!(
            create_err(ProbeSpec::new("CYCLES", Mode::empty(), 10000), MaskKind::Umask),
            ErrorKind::InvalidModeCombination
        );
        assert_eq!(
            create_err(
                ProbeSpec::new("CYCLES", Mode::USER, 10000).with_mask(1),
                MaskKind::None
            ),
            ErrorKind::MaskUnsupported
        );
        assert_eq!(
            create_err(
                ProbeSpec::new("PAPI_tot_cyc", Mode::USER, 10000).with_mask(1),
                MaskKind::Umask
            ),
            ErrorKind::MaskUnsupported
        );
        assert_eq!(
            create_err(ProbeSpec::new("CYCLES", Mode::USER, 4999), MaskKind::Umask),
            ErrorKind::ThresholdTooLow
        );
    }

    #[test]
    fn test_remove() {
        let r = Registry::new();
        let c = catalog(MaskKind::Umask);
        let p = r
            .create(ClientId(1), ProbeSpec::new("CYCLES", Mode::USER, 5000), &c, 5000)
            .unwrap();

        assert!(r.remove(&p));
        assert!(!r.remove(&p));
        assert_eq!(r.len(), 0);
    }
}
