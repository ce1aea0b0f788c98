use crate::error::Error;
use crate::{CpuId, Collaborators, Provider};

/// The default anti-DoS floor for overflow thresholds.
pub const DEFAULT_MIN_OVERFLOW: u64 = 5000;

/// Configure a [`Provider`].
///
/// Unless specified, the provider serves a single online CPU and rejects
/// overflow thresholds below [`DEFAULT_MIN_OVERFLOW`].
///
/// ```
/// # use std::sync::Arc;
/// use pmcmux::sim::{RecordingSink, SimPlatform};
/// use pmcmux::{Collaborators, Config};
///
/// let hw = Arc::new(SimPlatform::new(4, 4));
/// let collab = Collaborators::new(hw.clone(), hw, Arc::new(RecordingSink::default()));
///
/// let provider = Config::default()
///     .set_cpus(4)
///     .set_online(vec![0, 1, 2])
///     .set_min_overflow(1000)
///     .build(collab)?;
///
/// assert_eq!(provider.ncounters(), 4);
/// #
/// # Ok::<(), pmcmux::error::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    min_overflow: u64,
    ncpus: usize,
    online: Option<Vec<CpuId>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_overflow: DEFAULT_MIN_OVERFLOW,
            ncpus: 1,
            online: None,
        }
    }
}

impl Config {
    /// Set the smallest overflow threshold a probe may request.
    pub fn set_min_overflow(self, min_overflow: u64) -> Self {
        Self {
            min_overflow,
            ..self
        }
    }

    /// Set the number of CPUs the provider tracks. CPU ids are
    /// `0..ncpus`.
    pub fn set_cpus(self, ncpus: usize) -> Self {
        Self { ncpus, ..self }
    }

    /// Set which CPUs start online.
    ///
    /// Defaults to all of them. The remaining CPUs join through
    /// [`Provider::on_cpu_online`].
    ///
    /// [`Provider::on_cpu_online`]: struct.Provider.html#method.on_cpu_online
    pub fn set_online(self, online: impl Into<Vec<CpuId>>) -> Self {
        Self {
            online: Some(online.into()),
            ..self
        }
    }

    /// Build a [`Provider`] served by `collab`.
    pub fn build(&self, collab: Collaborators) -> Result<Provider, Error> {
        Provider::new(self, collab)
    }

    pub(crate) fn min_overflow(&self) -> u64 {
        self.min_overflow
    }

    pub(crate) fn ncpus(&self) -> usize {
        self.ncpus
    }

    pub(crate) fn starts_online(&self, cpu: CpuId) -> bool {
        match self.online {
            None => true,
            Some(ref cpus) => cpus.contains(&cpu),
        }
    }
}
