//! Platform event discovery.

use std::collections::HashSet;

/// Generic event names available on every platform that supports counters.
///
/// Generic events are mapped onto platform events by the backend and never
/// take a sub-event mask.
pub const GENERIC_EVENT_NAMES: &[&str] = &[
    "PAPI_tot_cyc",
    "PAPI_tot_ins",
    "PAPI_br_ins",
    "PAPI_br_msp",
    "PAPI_l1_dcm",
    "PAPI_l1_icm",
    "PAPI_l2_tcm",
    "PAPI_tlb_dm",
    "PAPI_tlb_im",
];

lazy_static! {
    static ref GENERIC_EVENTS: HashSet<&'static str> =
        GENERIC_EVENT_NAMES.iter().copied().collect();
}

/// Returns true if `event` is one of the [`GENERIC_EVENT_NAMES`].
pub fn is_generic(event: &str) -> bool {
    GENERIC_EVENTS.contains(event)
}

/// Overflow capabilities of the counter hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// The hardware raises an interrupt when a counter overflows.
    pub overflow_interrupt: bool,

    /// The interrupt reports which counter(s) overflowed, so several probes
    /// may be enabled at once.
    pub precise_overflow_attribution: bool,
}

/// How the platform selects sub-events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskKind {
    /// No sub-event selection.
    None,
    /// A unit mask qualifies the event (`umask` attribute).
    Umask,
    /// An event mask qualifies the event (`emask` attribute).
    Emask,
}

impl MaskKind {
    /// The backend attribute a probe's mask is passed under.
    pub fn attribute(&self) -> Option<&'static str> {
        match *self {
            MaskKind::None => None,
            MaskKind::Umask => Some("umask"),
            MaskKind::Emask => Some("emask"),
        }
    }
}

/// `EventCatalog` describes the events and capabilities of the platform.
///
/// It is queried when probes are created and once, for capabilities, when
/// the [`Provider`] is built.
///
/// [`Provider`]: ../struct.Provider.html
pub trait EventCatalog: Send + Sync {
    /// Every event name a probe may request.
    fn list_events(&self) -> Vec<String>;

    /// Overflow capabilities of the hardware.
    fn capabilities(&self) -> Capabilities;

    /// The sub-event mask style of the platform.
    fn supported_mask_kind(&self) -> MaskKind;

    /// Returns true if `event` may be requested.
    fn supports(&self, event: &str) -> bool {
        self.list_events().iter().any(|e| e == event)
    }

    /// Returns true if `event` accepts a sub-event mask.
    fn takes_mask(&self, event: &str) -> bool {
        self.supported_mask_kind() != MaskKind::None && !is_generic(event)
    }
}

/// An [`EventCatalog`] over a fixed event list.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    events: Vec<String>,
    caps: Capabilities,
    mask_kind: MaskKind,
}

impl StaticCatalog {
    /// A catalog of `events` plus the generic events.
    pub fn new(events: &[&str], caps: Capabilities, mask_kind: MaskKind) -> Self {
        let mut all: Vec<String> = GENERIC_EVENT_NAMES.iter().map(|e| e.to_string()).collect();
        for e in events {
            if !is_generic(e) {
                all.push(e.to_string());
            }
        }

        Self {
            events: all,
            caps,
            mask_kind,
        }
    }
}

impl EventCatalog for StaticCatalog {
    fn list_events(&self) -> Vec<String> {
        self.events.clone()
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn supported_mask_kind(&self) -> MaskKind {
        self.mask_kind
    }

    fn supports(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> Capabilities {
        Capabilities {
            overflow_interrupt: true,
            precise_overflow_attribution: true,
        }
    }

    #[test]
    fn test_generic_events_always_listed() {
        let c = StaticCatalog::new(&["CYCLES", "PAPI_tot_cyc"], caps(), MaskKind::Umask);
        assert!(c.supports("PAPI_tot_ins"));
        assert!(c.supports("CYCLES"));
        assert!(!c.supports("cycles"));
        assert_eq!(
            c.list_events().iter().filter(|e| *e == "PAPI_tot_cyc").count(),
            1
        );
    }

    #[test]
    fn test_generic_events_take_no_mask() {
        let c = StaticCatalog::new(&["BR_INST_RETIRED"], caps(), MaskKind::Emask);
        assert!(c.takes_mask("BR_INST_RETIRED"));
        assert!(!c.takes_mask("PAPI_br_ins"));

        let none = StaticCatalog::new(&["BR_INST_RETIRED"], caps(), MaskKind::None);
        assert!(!none.takes_mask("BR_INST_RETIRED"));
    }

    #[test]
    fn test_mask_attribute_names() {
        assert_eq!(MaskKind::Umask.attribute(), Some("umask"));
        assert_eq!(MaskKind::Emask.attribute(), Some("emask"));
        assert_eq!(MaskKind::None.attribute(), None);
    }
}
