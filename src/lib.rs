#![warn(missing_docs)]

//! `pmc-mux` lets many independent probes share the small, fixed set of
//! per-CPU hardware performance counters.
//!
//! A probe asks for an event (cycles, retired instructions, cache misses,
//! ...), the privilege levels to count it in, an optional sub-event mask and
//! an overflow threshold. Once enabled, the probe's counter is programmed on
//! every online CPU and the probe fires each time the counter overflows.
//!
//! The [`Provider`] arbitrates the counters:
//!
//! * a shared active table, one slot per hardware counter, records which
//!   probes run everywhere;
//! * enabling or disabling a probe halts, rebuilds and restarts the counter
//!   program of every online CPU, carrying in-flight counts forward;
//! * a per-CPU interrupt state byte keeps the overflow handler and
//!   reprogramming apart without the handler ever waiting;
//! * overflow interrupts are routed back to the probes owning the
//!   overflowing counters;
//! * CPUs can join and leave service at any time.
//!
//! The hardware itself, the event catalog and whatever runs when a probe
//! fires are collaborators behind traits ([`Backend`], [`EventCatalog`],
//! [`FireSink`]). The [`sim`] module provides a simulated multi-CPU
//! implementation of all of them.
//!
//! ```
//! use std::sync::Arc;
//!
//! use pmcmux::sim::{RecordingSink, SimPlatform};
//! use pmcmux::{ClientId, Collaborators, Config, Mode, ProbeSpec};
//!
//! let hw = Arc::new(SimPlatform::new(2, 4).with_events(&["CYCLES"]));
//! let sink = Arc::new(RecordingSink::default());
//! let provider = Config::default()
//!     .set_cpus(2)
//!     .build(Collaborators::new(hw.clone(), hw.clone(), sink.clone()))?;
//!
//! let probe = provider.create_probe(ClientId(1), ProbeSpec::new("CYCLES", Mode::ALL, 10000))?;
//! provider.enable(&probe)?;
//!
//! // 10000 cycles later the counter overflows and the probe fires.
//! let bitmap = hw.advance(0, "CYCLES", 10000);
//! assert_eq!(provider.overflow(0, bitmap, 0xdead, 0), 1);
//! assert_eq!(sink.fired(), vec![probe.id()]);
//!
//! provider.disable(&probe);
//! provider.destroy(&probe)?;
//! #
//! # Ok::<(), pmcmux::error::Error>(())
//! ```

#[macro_use]
extern crate lazy_static;

pub mod error;

mod mode;
pub use self::mode::Mode;

mod spec;
pub use self::spec::ProbeSpec;

pub mod catalog;
pub use self::catalog::{Capabilities, EventCatalog, MaskKind};

pub mod backend;
pub use self::backend::Backend;

mod consumer;
pub use self::consumer::{CounterConsumer, NoConsumer, NoSampler, Sampler};

mod sink;
pub use self::sink::FireSink;

mod cpu;
pub use self::cpu::{CpuId, NoPreempt, Preempt};

mod intr;
pub use self::intr::IntrState;

mod registry;
pub use self::registry::{ClientId, Probe, ProbeHandle, ProbeId};

mod table;

mod stats;
pub use self::stats::StatsSnapshot;

mod config;
pub use self::config::{Config, DEFAULT_MIN_OVERFLOW};

mod provider;
pub use self::provider::{Collaborators, Provider};

pub mod sim;
