//! Bus, DMA, FPGA loading and backplane core for XIA Pixie-16 crates.
//!
//! A crate holds up to 15 Pixie-16 modules on a shared PCI backplane. Each
//! module is reached through a PLX 9054 bridge whose local bus carries the
//! System FPGA registers. This crate turns those register accesses into
//! safe, bounded and retryable operations:
//!
//! - host bus arbitration and DSP memory access, with block reads streamed
//!   through DSP DMA channel 11 and the PLX DMA engine
//! - histogram (MCA) memory and list mode FIFO reads
//! - FPGA bitstream loading with retries and bus backoff
//! - backplane leader roles and the crate-wide sync-wait count
//! - run and control task sequencing
//!
//! # Backends
//!
//! ```text
//! HardwareBackend  : BAR 2 of the PLX bridge mapped through sysfs
//! SimBackend       : register file with enough System FPGA behaviour to
//!                    run every bus protocol without hardware
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use pixie16_driver::prelude::*;
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let devices = HardwareDeviceProvider::new(ModuleDef::default());
//! let chassis = Crate::new();
//! chassis.initialize(&devices)?;
//!
//! let module = chassis.module_by_number(0)?;
//! let mut words = vec![0; 1024];
//! HostBus::dsp(&module).read_block(0x4_a000, &mut words)?;
//!
//! chassis.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Locks
//!
//! | Lock | Kind | Guards |
//! |------|------|--------|
//! | crate | reentrant | slot table, firmware, totals |
//! | module | reentrant | lifecycle and run control |
//! | bus | exclusive | one multi-register bus protocol |
//!
//! Backplane state is atomics only.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
mod backplane;
mod chassis;
mod config;
pub mod csr;
mod error;
pub mod fifo;
pub mod firmware;
pub mod fpga;
pub mod hbr;
pub mod memory;
mod module;
pub mod run;
mod wait;

/// PCI identification of the module bridge (re-exported from pixie16-chip).
pub mod pcie_ids {
    pub use pixie16_chip::pcie::{lspci_filter, LOCAL_BUS_BAR, PLX_9054_DEVICE_ID, PLX_VENDOR_ID};
}

pub use backend::{select_backend, BackendSelection, BackendType, BusBackend};
pub use backends::{HardwareBackend, SimBackend};
pub use backplane::{Backplane, BackplaneMember, Role};
pub use chassis::{
    Counts, Crate, CrateUser, DeviceProvider, HardwareDeviceProvider, ModuleDef,
    SimDeviceProvider,
};
pub use config::{BootParams, DmaConfig, LoadTiming, RunTiming};
pub use error::{ErrorCode, PixieError, Result};
pub use firmware::{FirmwareImage, FirmwareRegistry, FirmwareSet, FirmwareTag};
pub use memory::{Fifo, HostBus, Mca};
pub use module::{BusGuard, ChannelConfig, Module, OpenedDevice};
pub use pixie16_chip::hw::{Address, Slot, Word, MAX_CHANNELS, MAX_SLOTS};
pub use run::{ControlTask, RunMode, RunTask};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        BootParams, Crate, DeviceProvider, ErrorCode, Fifo, FirmwareImage, FirmwareSet,
        FirmwareTag, HardwareDeviceProvider, HostBus, Mca, Module, ModuleDef, PixieError, Result,
        RunMode, SimDeviceProvider,
    };
}
