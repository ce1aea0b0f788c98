use std::fmt;

use crate::Mode;

/// The structured form of a probe specification.
///
/// A `ProbeSpec` names the event to count, the modes to count it in, an
/// optional sub-event mask and the number of events after which the counter
/// overflows and the probe fires.
///
/// ```
/// use pmcmux::{Mode, ProbeSpec};
///
/// let spec = ProbeSpec::new("PAPI_tot_cyc", Mode::ALL, 10000);
/// assert_eq!(spec.to_string(), "PAPI_tot_cyc-all-10000");
///
/// let masked = ProbeSpec::new("BR_INST_RETIRED", Mode::USER, 5000).with_mask(0x4);
/// assert_eq!(masked.to_string(), "BR_INST_RETIRED-user-0x4-5000");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbeSpec {
    /// Platform or generic event name.
    pub event: String,
    /// Privilege levels to count in.
    pub mode: Mode,
    /// Optional sub-event selector.
    pub mask: Option<u64>,
    /// Events per overflow.
    pub threshold: u64,
}

impl ProbeSpec {
    /// Describe a probe counting `event` in `mode`, overflowing every
    /// `threshold` events.
    pub fn new(event: impl Into<String>, mode: Mode, threshold: u64) -> Self {
        Self {
            event: event.into(),
            mode,
            mask: None,
            threshold,
        }
    }

    /// Attach a sub-event mask.
    pub fn with_mask(self, mask: u64) -> Self {
        Self {
            mask: Some(mask),
            ..self
        }
    }

    /// The counter value that overflows after exactly `threshold` events.
    pub fn preset(&self) -> u64 {
        0u64.wrapping_sub(self.threshold)
    }
}

/// Formats the canonical probe name, `<event>-<mode>[-<mask>]-<threshold>`.
impl fmt::Display for ProbeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-", self.event)?;
        match self.mode.name() {
            Some(m) => write!(f, "{}", m)?,
            None => write!(f, "none")?,
        }
        if let Some(mask) = self.mask {
            write!(f, "-{:#x}", mask)?;
        }
        write!(f, "-{}", self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_overflows_after_threshold() {
        let spec = ProbeSpec::new("PAPI_tot_ins", Mode::USER, 5000);
        let (v, overflowed) = spec.preset().overflowing_add(4999);
        assert!(!overflowed);
        assert_eq!(v, u64::MAX);
        assert!(spec.preset().overflowing_add(5000).1);
    }

    #[test]
    fn test_name_distinguishes_mode_and_mask() {
        let a = ProbeSpec::new("PAPI_tot_ins", Mode::USER, 5000);
        let b = ProbeSpec::new("PAPI_tot_ins", Mode::KERNEL, 5000);
        let c = a.clone().with_mask(0x10);
        assert_ne!(a.to_string(), b.to_string());
        assert_eq!(c.to_string(), "PAPI_tot_ins-user-0x10-5000");
    }
}
