extern crate pmcmux;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::thread;

use pmcmux::sim::*;
use pmcmux::*;

const NCPUS: usize = 4;
const NCOUNTERS: usize = 4;
const EVENTS: &[&str] = &["CYCLES", "INSTRUCTIONS", "CACHE_MISSES"];

/// Checks, from inside the dispatcher, that the CPU is held by the handler
/// and that the active table is self-consistent.
#[derive(Default)]
struct CheckingSink {
    provider: RwLock<Weak<Provider>>,
    fires: AtomicUsize,
    violations: AtomicUsize,
}

impl FireSink for CheckingSink {
    fn fire(&self, probe: ProbeId, pc: u64, _upc: u64) {
        self.fires.fetch_add(1, Ordering::SeqCst);

        let provider = match self.provider.read().unwrap().upgrade() {
            Some(p) => p,
            None => return,
        };

        let cpu = pc as CpuId;
        if provider.intr_state(cpu) != Some(IntrState::Processing) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }

        let ids: Vec<ProbeId> = provider.slots().into_iter().flatten().collect();
        let unique: HashSet<ProbeId> = ids.iter().copied().collect();
        if unique.len() != ids.len() || ids.len() > NCOUNTERS {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        if probe.get() == 0 {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// Small deterministic generator so failures reproduce.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

#[test]
fn test_interrupts_never_see_configuring_cpu() {
    let hw = Arc::new(SimPlatform::new(NCPUS, NCOUNTERS).with_events(EVENTS));
    let sink = Arc::new(CheckingSink::default());
    let sampler = Arc::new(CountingSampler::default());

    let provider = Arc::new(
        Config::default()
            .set_cpus(NCPUS)
            .build(
                Collaborators::new(hw.clone(), hw.clone(), sink.clone())
                    .with_sampler(sampler.clone()),
            )
            .expect("failed to build provider"),
    );
    *sink.provider.write().unwrap() = Arc::downgrade(&provider);

    let probes: Vec<ProbeHandle> = (0..6)
        .map(|i| {
            provider
                .create_probe(
                    ClientId(1),
                    ProbeSpec::new(EVENTS[i % EVENTS.len()], Mode::ALL, 5000 + i as u64),
                )
                .unwrap()
        })
        .collect();

    let stop = Arc::new(AtomicBool::new(false));
    let interrupters: Vec<_> = (0..NCPUS)
        .map(|cpu| {
            let hw = hw.clone();
            let provider = provider.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut rng = Lcg(cpu as u64 + 1);
                while !stop.load(Ordering::SeqCst) {
                    let event = EVENTS[(rng.next() % EVENTS.len() as u64) as usize];
                    let mut bitmap = hw.advance(cpu, event, 1000 + rng.next() % 4000);
                    if rng.next() % 8 == 0 {
                        bitmap |= 1 << 40;
                    }
                    provider.overflow(cpu, bitmap, cpu as u64, 0);
                }
            })
        })
        .collect();

    let mut rng = Lcg(42);
    for _ in 0..2000 {
        let p = &probes[(rng.next() % probes.len() as u64) as usize];
        match rng.next() % 10 {
            0 => {
                let cpu = 1 + (rng.next() % (NCPUS as u64 - 1)) as usize;
                if provider.is_online(cpu) {
                    provider.on_cpu_offline(cpu).unwrap();
                } else {
                    provider.on_cpu_online(cpu).unwrap();
                }
            }
            1..=5 => {
                if let Err(e) = provider.enable(p) {
                    assert_eq!(e.kind(), &error::ErrorKind::ResourceExhausted);
                }
            }
            _ => provider.disable(p),
        }

        assert_eq!(provider.occupied_slots(), provider.active_enablings());
        let enabled = probes.iter().filter(|p| p.is_enabled()).count();
        assert_eq!(enabled, provider.active_enablings());
        assert!(provider.active_enablings() <= NCOUNTERS);
    }

    stop.store(true, Ordering::SeqCst);
    for t in interrupters {
        t.join().unwrap();
    }

    for p in probes.iter() {
        provider.disable(p);
    }
    for cpu in 0..NCPUS {
        assert_eq!(provider.intr_state(cpu), Some(IntrState::Inactive));
    }

    assert_eq!(sink.violations.load(Ordering::SeqCst), 0);
    assert_eq!(sampler.suspends(), sampler.resumes());
    assert_eq!(
        provider.stats().fires,
        sink.fires.load(Ordering::SeqCst) as u64
    );
}
