//! Shared fixtures for the integration tests

#![allow(dead_code)]

use pixie16_driver::{
    BootParams, Crate, FirmwareImage, FirmwareSet, LoadTiming, ModuleDef, RunTiming,
    SimDeviceProvider, Slot,
};

/// An initialised crate of simulated modules, one per slot
pub fn sim_crate(slots: &[Slot]) -> (Crate, SimDeviceProvider) {
    let devices = SimDeviceProvider::new(slots.iter().map(|&slot| ModuleDef::at_slot(slot)));
    let chassis = Crate::new().with_run_timing(fast_runs());
    chassis.initialize(&devices).expect("initialize");
    (chassis, devices)
}

/// Firmware for the default module layout
pub fn firmware() -> FirmwareSet {
    FirmwareSet::new(ModuleDef::default().firmware_tag())
        .with_image(FirmwareImage::new("sys", vec![0x5a_u8; 64]).expect("sys image"))
        .with_image(FirmwareImage::new("fippi", vec![0xa5_u8; 128]).expect("fippi image"))
}

/// Boot with no waits between polls
pub fn fast_boot() -> BootParams {
    BootParams::default().with_timing(LoadTiming::immediate(20))
}

/// Run control with a short end wait
pub fn fast_runs() -> RunTiming {
    RunTiming::default().with_end_wait_ms(5).with_poll_us(0)
}

/// A 12-byte test bitstream
pub fn bitstream_12() -> FirmwareImage {
    FirmwareImage::new(
        "sys",
        vec![
            0xde_u8, 0xad, 0xbe, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef,
        ],
    )
    .expect("image")
}
