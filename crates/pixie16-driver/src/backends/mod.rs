//! Bus backend implementations
//!
//! Two backends available:
//! - **Hardware**: the PLX 9054 local bus mapped from PCI BAR 2
//! - **Simulated**: a register file with host bus and FIFO emulation

pub mod hardware;
pub mod mmap;
pub mod sim;

pub use hardware::HardwareBackend;
pub use sim::{ReadHook, SimBackend};
