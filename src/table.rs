//! The active-request table.
//!
//! One slot per hardware counter, shared by every CPU: the non-empty slots
//! are exactly the probes that should be running everywhere. Writers hold the
//! topology lock and only ever write-lock an empty slot or the slot of a probe
//! whose counters are stopped. The overflow dispatcher reads with `try_read`
//! and never waits, so it can only miss a slot that has nothing to fire.

use std::sync::Arc;

use spin::RwLock;

use crate::error::{new_error, Error, ErrorKind};
use crate::registry::{Probe, ProbeHandle, ProbeId};

#[derive(Debug)]
pub(crate) struct ActiveTable {
    slots: Box<[RwLock<Option<ProbeHandle>>]>,
}

impl ActiveTable {
    pub(crate) fn new(nslots: usize) -> Self {
        Self {
            slots: (0..nslots).map(|_| RwLock::new(None)).collect(),
        }
    }

    /// Place `probe` in the first empty slot. Occupied slots are only read.
    pub(crate) fn acquire(&self, probe: &ProbeHandle) -> Result<usize, Error> {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.read().is_some() {
                continue;
            }
            let mut s = slot.write();
            if s.is_none() {
                *s = Some(Arc::clone(probe));
                probe.set_slot(Some(i));
                return Ok(i);
            }
        }
        Err(new_error(ErrorKind::ResourceExhausted))
    }

    /// Clear the slot holding `probe`, if any.
    pub(crate) fn release(&self, probe: &Probe) {
        let idx = match probe.slot() {
            Some(i) => i,
            None => return,
        };
        if let Some(slot) = self.slots.get(idx) {
            let mut s = slot.write();
            if s.as_ref().map(|p| p.id()) == Some(probe.id()) {
                *s = None;
            }
        }
        probe.set_slot(None);
    }

    /// Every probe in the table, in slot order.
    pub(crate) fn probes(&self) -> Vec<ProbeHandle> {
        self.slots
            .iter()
            .filter_map(|s| s.read().as_ref().map(Arc::clone))
            .collect()
    }

    /// Probe ids per slot.
    pub(crate) fn ids(&self) -> Vec<Option<ProbeId>> {
        self.slots
            .iter()
            .map(|s| s.read().as_ref().map(|p| p.id()))
            .collect()
    }

    pub(crate) fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.read().is_some()).count()
    }

    /// Visit occupied slots without waiting. A slot a writer is holding is
    /// skipped.
    pub(crate) fn try_for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Probe) -> bool,
    {
        for slot in self.slots.iter() {
            if let Some(guard) = slot.try_read() {
                if let Some(p) = guard.as_ref() {
                    if !f(p) {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use crate::catalog::{Capabilities, MaskKind, StaticCatalog};
    use crate::registry::{ClientId, Registry};
    use crate::{Mode, ProbeSpec};

    fn probes(n: u64) -> Vec<ProbeHandle> {
        let r = Registry::new();
        let c = StaticCatalog::new(&[], Capabilities::default(), MaskKind::None);
        (0..n)
            .map(|i| {
                r.create(
                    ClientId(1),
                    ProbeSpec::new("PAPI_tot_cyc", Mode::ALL, 5000 + i),
                    &c,
                    5000,
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_acquire_until_exhausted() {
        let t = ActiveTable::new(2);
        let p = probes(3);

        assert_eq!(t.acquire(&p[0]).unwrap(), 0);
        assert_eq!(t.acquire(&p[1]).unwrap(), 1);
        assert_eq!(
            *t.acquire(&p[2]).unwrap_err().kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(p[2].slot(), None);
        assert_eq!(t.occupied(), 2);
    }

    #[test]
    fn test_release_reuses_slot() {
        let t = ActiveTable::new(2);
        let p = probes(3);

        t.acquire(&p[0]).unwrap();
        t.acquire(&p[1]).unwrap();
        t.release(&p[0]);
        assert_eq!(p[0].slot(), None);
        assert_eq!(t.ids(), vec![None, Some(p[1].id())]);

        assert_eq!(t.acquire(&p[2]).unwrap(), 0);
        assert_eq!(t.probes().len(), 2);

        // Releasing an unslotted probe is a no-op.
        t.release(&p[0]);
        assert_eq!(t.occupied(), 2);
    }

    #[test]
    fn test_try_for_each_stops_early() {
        let t = ActiveTable::new(4);
        for p in probes(3).iter() {
            t.acquire(p).unwrap();
        }

        let mut seen = 0;
        t.try_for_each(|_| {
            seen += 1;
            false
        });
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_acquire_does_not_lock_occupied_slots() {
        let t = Arc::new(ActiveTable::new(2));
        let p = probes(2);
        t.acquire(&p[0]).unwrap();

        // A dispatcher is mid-visit on slot 0.
        let visit = t.slots[0].read();

        let (tx, rx) = mpsc::channel();
        let table = Arc::clone(&t);
        let next = Arc::clone(&p[1]);
        thread::spawn(move || {
            let _ = tx.send(table.acquire(&next).map_err(|e| *e.kind()));
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(Ok(1)));
        assert_eq!(visit.as_ref().map(|p| p.id()), Some(p[0].id()));
    }

    #[test]
    fn test_reader_always_sees_occupied_slot_while_others_change() {
        let t = Arc::new(ActiveTable::new(4));
        let p = probes(3);
        t.acquire(&p[0]).unwrap();
        let want = p[0].id();

        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let t = Arc::clone(&t);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut missed = 0;
                while !stop.load(Ordering::SeqCst) {
                    let mut seen = false;
                    t.try_for_each(|p| {
                        seen |= p.id() == want;
                        true
                    });
                    if !seen {
                        missed += 1;
                    }
                }
                missed
            })
        };

        for _ in 0..20000 {
            t.acquire(&p[1]).unwrap();
            t.acquire(&p[2]).unwrap();
            t.release(&p[1]);
            t.release(&p[2]);
        }
        stop.store(true, Ordering::SeqCst);

        assert_eq!(reader.join().unwrap(), 0);
        assert_eq!(t.ids()[0], Some(want));
    }
}
