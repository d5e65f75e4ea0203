//! Tests against a real crate
//!
//! Run with `cargo test -- --ignored` on a host with Pixie-16 modules
//! and read/write access to their PCI resources.

use pixie16_driver::prelude::*;
use pixie16_driver::pcie_ids;

#[test]
#[ignore] // Requires hardware
fn test_scan_finds_modules() {
    let addresses = HardwareDeviceProvider::scan();
    println!("found {} bridges ({})", addresses.len(), pcie_ids::lspci_filter());
    for address in &addresses {
        println!("  {address}");
    }
    assert!(!addresses.is_empty());
}

#[test]
#[ignore] // Requires hardware
fn test_initialize_and_shutdown() {
    let devices = HardwareDeviceProvider::new(ModuleDef::default());
    let chassis = Crate::new();
    chassis.initialize(&devices).expect("initialize");

    let counts = chassis.counts();
    println!("{counts}");
    assert!(counts.present > 0);

    for module in chassis.modules().iter().filter(|m| m.present()) {
        println!(
            "slot {}: serial={} revision={} online={}",
            module.slot(),
            module.serial(),
            module.revision(),
            module.online()
        );
    }

    chassis.shutdown().expect("shutdown");
}

#[test]
#[ignore] // Requires hardware
fn test_dsp_block_read() {
    let devices = HardwareDeviceProvider::new(ModuleDef::default());
    let chassis = Crate::new();
    chassis.initialize(&devices).expect("initialize");

    let module = chassis.module_by_number(0).expect("module 0");
    if module.online() {
        let mut words = vec![0; 10_000];
        HostBus::dsp(&module)
            .read_block(0x4_a000, &mut words)
            .expect("block read");
    }

    chassis.shutdown().expect("shutdown");
}
