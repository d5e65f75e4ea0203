//! Hardware model of the Pixie-16 DSP module.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the module as seen from the host: the System FPGA register
//! map, CSR and CPLD bit numbers, host bus addresses, the FPGA control
//! descriptors used to clear and program the bitstreams, and the protocol
//! constants the driver layers build on.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`hw`] | Slot/channel limits, DMA and FIFO sizing, word types |
//! | [`pcie`] | PLX 9054 bridge identifiers and the BAR carrying the registers |
//! | [`regs`] | System FPGA and boot CPLD register map, bit numbers, HBR values |
//! | [`memory`] | DSP, MCA and FIFO bus windows and DSP DMA registers |
//! | [`fpga`] | Clear/load control masks for the comms and FiPPI FPGAs |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod fpga;
pub mod hw;
pub mod memory;
pub mod pcie;
pub mod regs;
