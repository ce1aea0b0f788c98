use std::sync::atomic::{AtomicBool, Ordering};

use crate::backend::ProgrammedSet;
use crate::intr::IntrLock;

/// Logical CPU index.
pub type CpuId = usize;

/// Hook into the host's preemption control.
///
/// The reprogramming protocol runs with preemption disabled so it cannot be
/// migrated or descheduled between blocking and releasing CPUs.
pub trait Preempt: Send + Sync {
    /// Disable preemption of the calling context.
    fn disable(&self);

    /// Re-enable preemption of the calling context.
    fn enable(&self);
}

/// A [`Preempt`] for hosts where the caller cannot be preempted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPreempt;

impl Preempt for NoPreempt {
    fn disable(&self) {}

    fn enable(&self) {}
}

/// Preemption stays disabled until this guard is dropped.
pub(crate) struct NoPreemptGuard<'a>(&'a dyn Preempt);

impl<'a> NoPreemptGuard<'a> {
    pub(crate) fn new(p: &'a dyn Preempt) -> Self {
        p.disable();
        NoPreemptGuard(p)
    }
}

impl<'a> Drop for NoPreemptGuard<'a> {
    fn drop(&mut self) {
        self.0.enable();
    }
}

/// Per-CPU service state.
///
/// `ctx` is only touched by the holder of the topology lock, and only while
/// the CPU's interrupt is blocked or the CPU has no running counters.
#[derive(Debug)]
pub(crate) struct Cpu {
    pub(crate) id: CpuId,
    pub(crate) intr: IntrLock,
    online: AtomicBool,
    pub(crate) ctx: spin::Mutex<Option<ProgrammedSet>>,
}

impl Cpu {
    pub(crate) fn new(id: CpuId, online: bool) -> Self {
        Self {
            id,
            intr: IntrLock::new(),
            online: AtomicBool::new(online),
            ctx: spin::Mutex::new(None),
        }
    }

    pub(crate) fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }
}
