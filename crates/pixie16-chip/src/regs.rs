//! Local bus register map of the Pixie-16.
//!
//! Two devices answer on the local bus behind the PLX bridge:
//!
//! ```text
//! 0x00 - 0x18  IO FPGA (COMM / boot CPLD): FPGA configuration, I2C, DCM reset
//! 0x48 - 0xf4  System FPGA: CSR, host bus request, DSP and external memory
//! ```
//!
//! Offsets are byte offsets into the mapped local bus BAR.

use crate::hw::Address;

// ── IO FPGA (boot CPLD) ──────────────────────────────────────────────────────

/// FPGA configuration data: one bitstream word per write.
pub const CFG_DATACS: Address = 0x00;
/// FPGA configuration control: PROGB and select lines.
pub const CFG_CTRLCS: Address = 0x04;
/// FPGA configuration read back: INIT and DONE lines.
pub const CFG_RDCS: Address = 0x08;
/// IO FPGA version.
pub const CFG_RDVER: Address = 0x0c;
/// I2C bit-bash port (EEPROM and I/O expanders).
pub const I2C_PORT: Address = 0x10;
/// DCM reset, written after the FiPPIs are programmed.
pub const CFG_DCMRST: Address = 0x14;
/// DAC control.
pub const CFG_DAC: Address = 0x18;

// ── System FPGA ──────────────────────────────────────────────────────────────

/// Host control/status register.
pub const CSR: Address = 0x48;
/// Host bus request.
pub const REQUEST_HBR: Address = 0x80;
/// Host bus release.
pub const HBR_DONE: Address = 0x84;
/// External (MCA) memory address.
pub const WRT_EXT_MEM: Address = 0xc0;
/// DSP memory address for host bus access.
pub const EXT_MEM_TEST: Address = 0xc4;
/// DSP memory data for host bus access.
pub const WRT_DSP_MMA: Address = 0xc8;
/// External FIFO read length.
pub const SET_EXT_FIFO: Address = 0xcc;
/// DSP DMA channel 11 control.
pub const WRT_DSP_DMAC11: Address = 0xd0;
/// DSP DMA channel 11 internal index (source address).
pub const WRT_DSP_II11: Address = 0xd4;
/// Clear external memory.
pub const WRT_CLR_EXTMEM: Address = 0xd8;
/// DSP DMA channel 11 count.
pub const WRT_DSP_C11: Address = 0xdc;
/// DSP DMA channel 11 internal modifier.
pub const WRT_DSP_IM11: Address = 0xe0;
/// DSP DMA channel 11 external count.
pub const WRT_DSP_EC11: Address = 0xe4;
/// External FIFO watermark level: written as the watermark, read as the fill level.
pub const RD_WRT_FIFO_WML: Address = 0xe8;
/// Route external memory through the short FIFO.
pub const SET_EXMEM_FIFO: Address = 0xec;
/// Route the DSP DMA output through the internal FIFO.
pub const SET_INT_FIFO: Address = 0xf0;
/// Reset the run FIFO counters.
pub const WRT_RESET_RFCNT: Address = 0xf4;

// ── Host bus request values ──────────────────────────────────────────────────

/// Host bus request and DSP access values.
pub mod hbr {
    use crate::hw::Word;

    /// Request the bus: HBR and DSP chip select low.
    pub const REQUEST: Word = 0xC;
    /// Release the bus (the default, bus released).
    pub const RELEASE: Word = 0xD;
}

// ── Host CSR bits ────────────────────────────────────────────────────────────

/// Host CSR bit numbers.
pub mod csr {
    /// Enable run.
    pub const RUNENA: u32 = 0;
    /// Enable DSP code download.
    pub const DSPDOWNLOAD: u32 = 1;
    /// PCI I/O is active.
    pub const PCIACTIVE: u32 = 2;
    /// Pull-up for the SYNC lines.
    pub const PULLUP_CTRL: u32 = 3;
    /// Reset the DSP.
    pub const DSPRESET: u32 = 4;
    /// External FIFO watermark level reached.
    pub const EXTFIFO_WML: u32 = 6;
    /// Run active.
    pub const RUNACTIVE: u32 = 13;
    /// Clearing external memory in progress.
    pub const CLREXTMEM_ACTIVE: u32 = 15;

    /// Mask for a bit number.
    #[must_use]
    pub const fn mask(bit: u32) -> u32 {
        1 << bit
    }
}

// ── Boot CPLD control bits ───────────────────────────────────────────────────

/// `CFG_CTRLCS` bit numbers.
pub mod cpld {
    /// Select System FPGA.
    pub const SEL_SYS_FPGA: u32 = 0;
    /// PROGB System FPGA.
    pub const PROGB_SYS_FPGA: u32 = 1;
    /// PROGB FiPPI 0.
    pub const PROGB_FIPPI_0_FPGA: u32 = 5;
    /// PROGB FiPPI 1.
    pub const PROGB_FIPPI_1_FPGA: u32 = 7;
    /// PROGB FiPPI 2.
    pub const PROGB_FIPPI_2_FPGA: u32 = 9;
    /// PROGB FiPPI 3.
    pub const PROGB_FIPPI_3_FPGA: u32 = 11;
    /// Connect the PXI nearest neighbour lines to the backplane.
    pub const BPCONNECT: u32 = 12;
    /// Backplane pull-ups: 1 pulled up.
    pub const PULLUP: u32 = 13;

    /// PROGB for every FPGA on the module.
    pub const PROGB_ALL_FPGAS: u32 = 1 << PROGB_SYS_FPGA
        | 1 << PROGB_FIPPI_0_FPGA
        | 1 << PROGB_FIPPI_1_FPGA
        | 1 << PROGB_FIPPI_2_FPGA
        | 1 << PROGB_FIPPI_3_FPGA;
}

// ── Module CSRB bits ─────────────────────────────────────────────────────────

/// `ModCSRB` bit numbers that claim backplane roles.
pub mod modcsrb {
    /// Pull-ups for the PXI trigger lines through the CPLD.
    pub const CPLDPULLUP: u32 = 0;
    /// Director mode for multi-crate runs.
    pub const DIRMOD: u32 = 4;
    /// This module is the crate's run leader.
    pub const CHASSISMASTER: u32 = 6;
}
