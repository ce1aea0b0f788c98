extern crate pmcmux;

use std::sync::Arc;

use pmcmux::sim::{RecordingSink, SimPlatform};
use pmcmux::{ClientId, Collaborators, Config, Mode, ProbeSpec};

fn main() {
	let hw = Arc::new(SimPlatform::new(4, 4).with_events(&["CYCLES", "INSTRUCTIONS"]));
	let sink = Arc::new(RecordingSink::default());

	let provider = Config::default()
		.set_cpus(4)
		.build(Collaborators::new(hw.clone(), hw.clone(), sink.clone()))
		.unwrap();

	let cycles = provider
		.create_probe(ClientId(1), ProbeSpec::new("CYCLES", Mode::ALL, 10000))
		.unwrap();
	let instr = provider
		.create_probe(ClientId(1), ProbeSpec::new("INSTRUCTIONS", Mode::USER, 5000))
		.unwrap();

	provider.enable(&cycles).unwrap();
	provider.enable(&instr).unwrap();

	for i in 0..20u64 {
		// do some "work" on every cpu...
		for cpu in 0..4 {
			let mut bitmap = hw.advance(cpu, "CYCLES", 1500 + cpu as u64 * 100);
			bitmap |= hw.advance(cpu, "INSTRUCTIONS", 700);
			provider.overflow(cpu, bitmap, 0x1000 + i, 0);
		}
	}

	provider.disable(&cycles);
	provider.disable(&instr);

	let fired = sink.fired();
	println!(
		"{}: {} fires, {}: {} fires",
		cycles.name(),
		fired.iter().filter(|id| **id == cycles.id()).count(),
		instr.name(),
		fired.iter().filter(|id| **id == instr.id()).count(),
	);
	println!("{:?}", provider.stats());
}
