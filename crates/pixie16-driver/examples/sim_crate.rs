//! A simulated two-module crate: boot, block read, histogram run, shutdown.
//!
//! ```text
//! RUST_LOG=pixie16_driver=info cargo run --example sim_crate
//! ```

use anyhow::Result;
use pixie16_chip::regs;
use pixie16_driver::prelude::*;
use pixie16_driver::{LoadTiming, Word};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    println!("Pixie-16 simulated crate");
    println!("========================");
    println!();

    let devices = SimDeviceProvider::new([
        ModuleDef::at_slot(2).with_serial(1034),
        ModuleDef::at_slot(3).with_serial(1035).unloaded(),
    ]);
    let chassis = Crate::new();
    chassis.initialize(&devices)?;
    println!("initialised: {}", chassis.counts());

    let tag = ModuleDef::default().firmware_tag();
    chassis.add_firmware(
        FirmwareSet::new(tag)
            .with_image(FirmwareImage::new("sys", vec![0x55_u8; 4096])?)
            .with_image(FirmwareImage::new("fippi", vec![0xaa_u8; 8192])?),
    );
    chassis.set_firmware()?;

    // The simulator reports every FPGA loaded once programmed.
    if let Some(sim) = devices.backend(1) {
        sim.set_register(regs::CFG_RDCS, Word::MAX);
    }

    let start = Instant::now();
    chassis.boot(&BootParams::default().with_timing(LoadTiming::immediate(250)))?;
    println!("booted in {:?}: {}", start.elapsed(), chassis.counts());

    let module = chassis.module(3)?;
    if let Some(sim) = devices.backend(1) {
        let pattern: Vec<Word> = (0..10_000).collect();
        sim.set_dsp_words(0x4_0000, &pattern);
    }

    let mut words = vec![0; 10_000];
    let start = Instant::now();
    HostBus::dsp(&module).read_block(0x4_0000, &mut words)?;
    println!(
        "read {} words in {:?}, last={:#x}",
        words.len(),
        start.elapsed(),
        words[words.len() - 1]
    );

    module.start_histograms(RunMode::NewRun)?;
    module.end_run()?;

    let mut histogram = vec![0; 1024];
    Mca::new(&module).read_histogram(0, &mut histogram)?;
    println!(
        "channel 0: {} counts in the first {} bins",
        histogram.iter().map(|&w| u64::from(w)).sum::<u64>(),
        histogram.len()
    );

    chassis.shutdown()?;
    println!("shutdown: {}", chassis.counts());
    Ok(())
}
