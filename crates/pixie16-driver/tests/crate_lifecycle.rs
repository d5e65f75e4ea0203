//! Crate bring-up, boot, runs and shutdown on simulated modules

mod common;

use pixie16_chip::regs::{self, csr::mask, modcsrb};
use pixie16_chip::hw::LARGE_HISTOGRAM_LENGTH;
use pixie16_driver::prelude::*;
use pixie16_driver::{Counts, Word, MAX_SLOTS};

fn counts(present: usize, online: usize, offline: usize) -> Counts {
    Counts {
        present,
        online,
        offline,
    }
}

#[test]
fn test_full_lifecycle() {
    let devices = SimDeviceProvider::new([
        ModuleDef::at_slot(2).with_serial(1001),
        ModuleDef::at_slot(5).with_serial(1002).unloaded(),
    ]);
    let chassis = Crate::new().with_run_timing(common::fast_runs());
    chassis.initialize(&devices).unwrap();
    assert!(chassis.ready());
    assert_eq!(chassis.counts(), counts(2, 1, 1));
    assert_eq!(chassis.module_by_number(1).unwrap().slot(), 5);

    chassis.add_firmware(common::firmware());
    chassis.set_firmware().unwrap();

    let sim = devices.backend(1).unwrap();
    sim.set_register(regs::CFG_RDCS, Word::MAX);
    chassis.boot(&common::fast_boot()).unwrap();
    assert_eq!(chassis.counts(), counts(2, 2, 0));
    assert!(chassis.probe().unwrap());

    let a = chassis.module(2).unwrap();
    let b = chassis.module(5).unwrap();

    // Synchronised histogram run with slot 2 leading.
    a.backplane_csrb(mask(modcsrb::CHASSISMASTER)).unwrap();
    a.set_sync_wait(true).unwrap();
    b.set_sync_wait(true).unwrap();
    a.start_histograms(RunMode::NewRun).unwrap();
    b.start_histograms(RunMode::NewRun).unwrap();
    assert!(a.run_active().unwrap());
    a.end_run().unwrap();
    b.end_run().unwrap();
    assert!(!a.run_active().unwrap());

    let histogram: Vec<Word> = (1..=64).collect();
    sim.set_mca_words(3 * LARGE_HISTOGRAM_LENGTH, &histogram);
    let mut buf = vec![0; 64];
    Mca::new(&b).read_histogram(3, &mut buf).unwrap();
    assert_eq!(buf, histogram);

    // List mode on one module without sync wait.
    a.set_sync_wait(false).unwrap();
    b.set_sync_wait(false).unwrap();
    b.start_listmode(RunMode::NewRun).unwrap();
    let events: Vec<Word> = (0..300).map(|i| 0xa000_0000 | i).collect();
    sim.push_fifo(&events);
    let fifo = Fifo::new(&b);
    assert_eq!(fifo.level().unwrap(), 300);
    let mut buf = vec![0; 300];
    fifo.read(&mut buf).unwrap();
    assert_eq!(buf, events);
    b.end_run().unwrap();

    chassis.shutdown().unwrap();
    assert!(!chassis.ready());
    assert_eq!(chassis.counts(), counts(0, 0, 0));
    assert!(chassis.module(2).is_err());
}

#[test]
fn test_boot_selected_slots() {
    let devices = SimDeviceProvider::new([
        ModuleDef::at_slot(2).unloaded(),
        ModuleDef::at_slot(3).unloaded(),
    ]);
    let chassis = Crate::new();
    chassis.initialize(&devices).unwrap();
    chassis.add_firmware(common::firmware());
    chassis.set_firmware().unwrap();

    devices
        .backend(1)
        .unwrap()
        .set_register(regs::CFG_RDCS, Word::MAX);
    chassis
        .boot(&common::fast_boot().with_slots(vec![3]))
        .unwrap();

    assert!(!chassis.module(2).unwrap().online());
    assert!(chassis.module(3).unwrap().online());
    assert!(devices.backend(0).unwrap().writes(regs::CFG_DATACS).is_empty());
    assert_eq!(chassis.counts(), counts(2, 1, 1));
}

#[test]
fn test_boot_failure_leaves_module_offline() {
    let devices = SimDeviceProvider::new([ModuleDef::at_slot(2).unloaded()]);
    let chassis = Crate::new();
    chassis.initialize(&devices).unwrap();
    chassis.add_firmware(common::firmware());
    chassis.set_firmware().unwrap();

    // CPLD never reports the clear.
    let err = chassis
        .boot(&common::fast_boot().with_retries(2))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::DeviceLoadFailure);
    assert!(err.to_string().contains("fpga-sys clear failure"));
    assert!(!chassis.module(2).unwrap().online());
    assert!(chassis.counts().valid(MAX_SLOTS));
    assert_eq!(chassis.counts(), counts(1, 0, 1));
}

#[test]
fn test_firmware_matched_by_tag() {
    let devices = SimDeviceProvider::new([
        ModuleDef::at_slot(2),
        ModuleDef::at_slot(3).with_adc(14, 500, 5),
    ]);
    let chassis = Crate::new();
    chassis.initialize(&devices).unwrap();

    chassis.add_firmware(common::firmware());
    chassis.set_firmware().unwrap();
    assert!(chassis.firmware(2).is_some());
    assert!(chassis.firmware(3).is_none());
    let err = chassis
        .boot(&common::fast_boot().with_slots(vec![3]))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ModuleInitializeFailure);
    assert!(err.to_string().contains("no firmware set"));

    let fast = FirmwareSet::new(FirmwareTag::new(15, 500, 14))
        .with_image(FirmwareImage::new("sys", vec![1u8; 8]).unwrap())
        .with_image(FirmwareImage::new("fippi", vec![2u8; 8]).unwrap());
    chassis.add_firmware(fast);
    chassis.set_firmware().unwrap();

    assert_eq!(chassis.firmware(2).unwrap().tag().to_string(), "15-250-16");
    assert_eq!(chassis.firmware(3).unwrap().tag().to_string(), "15-500-14");
}

#[test]
fn test_slot_offline_and_back() {
    let (chassis, _devices) = common::sim_crate(&[2, 3, 4]);
    chassis.set_offline(3).unwrap();
    assert_eq!(chassis.counts(), counts(3, 2, 1));

    let module = chassis.module(3).unwrap();
    let mut buf = vec![0; 8];
    let err = HostBus::dsp(&module).read_block(0, &mut buf).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ModuleOffline);

    let err = chassis.set_offline(3).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ModuleNotFound);

    chassis.set_online(3).unwrap();
    assert_eq!(chassis.counts(), counts(3, 3, 0));
}

#[test]
fn test_crate_users() {
    let (chassis, _devices) = common::sim_crate(&[2]);
    {
        let _user = chassis.user();
        let _other = chassis.user();
        assert_eq!(chassis.users(), 2);
        assert!(chassis.busy());
    }
    assert!(!chassis.busy());
    chassis.shutdown().unwrap();
}
