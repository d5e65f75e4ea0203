//! FPGA configuration controls.
//!
//! Each FPGA (or FPGA pair) is cleared and programmed through the boot
//! CPLD. A control triple is applied to `CFG_RDCS` as
//! `(value & clear) | set` and written to `CFG_CTRLCS`; the phase is complete
//! when `CFG_RDCS & done == done`.

use crate::regs;

/// A clear/set/done mask triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    /// AND mask applied to the current control value.
    pub clear: u32,
    /// OR mask applied after `clear`.
    pub set: u32,
    /// Bits that must all read back set for the phase to be complete.
    pub done: u32,
}

impl Controls {
    /// Create a control triple.
    #[must_use]
    pub const fn new(clear: u32, set: u32, done: u32) -> Self {
        Self { clear, set, done }
    }

    /// Apply the triple to a control register value.
    #[must_use]
    pub const fn apply(&self, value: u32) -> u32 {
        (value & self.clear) | self.set
    }

    /// Are all of the done bits set in `status`?
    #[must_use]
    pub const fn is_done(&self, status: u32) -> bool {
        status & self.done == self.done
    }
}

/// Registers an FPGA is programmed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Regs {
    /// Bitstream data.
    pub data: u32,
    /// Control.
    pub control: u32,
    /// Read status.
    pub read_status: u32,
}

/// The boot CPLD configuration registers.
pub const CPLD_REGS: Regs = Regs {
    data: regs::CFG_DATACS,
    control: regs::CFG_CTRLCS,
    read_status: regs::CFG_RDCS,
};

/// Communications (System) FPGA.
pub mod comms {
    use super::Controls;

    /// Label.
    pub const NAME: &str = "sys";
    /// PROGB low: clear the FPGA. Done when INIT is high.
    pub const CLEAR: Controls = Controls::new(0xffff_f000, 0x0000_0551, 0x001);
    /// PROGB high: start configuration. Done when INIT and DONE are high.
    pub const LOAD: Controls = Controls::new(0xffff_f000, 0x0000_0553, 0x003);
}

/// Signal processing FPGAs, programmed in two pairs with the same image.
pub mod fippi {
    use super::Controls;

    /// Label of FiPPIs 1 and 2.
    pub const NAME_1_2: &str = "fippi-1-2";
    /// Clear FiPPIs 1 and 2.
    pub const CLEAR_1_2: Controls = Controls::new(0xffff_f000, 0x0000_0052, 0x053);
    /// Load FiPPIs 1 and 2.
    pub const LOAD_1_2: Controls = Controls::new(0xffff_f000, 0x0000_00f2, 0x0a3);

    /// Label of FiPPIs 3 and 4.
    pub const NAME_3_4: &str = "fippi-3-4";
    /// Clear FiPPIs 3 and 4.
    pub const CLEAR_3_4: Controls = Controls::new(0xffff_f000, 0x0000_05a2, 0x5a3);
    /// Load FiPPIs 3 and 4.
    pub const LOAD_3_4: Controls = Controls::new(0xffff_f000, 0x0000_0fa2, 0xaa3);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_keeps_upper_bits() {
        assert_eq!(comms::CLEAR.apply(0x1234_5fff), 0x1234_5551);
    }

    #[test]
    fn done_needs_every_bit() {
        assert!(comms::LOAD.is_done(0x3));
        assert!(!comms::LOAD.is_done(0x1));
        assert!(fippi::LOAD_3_4.is_done(0xffff_ffff));
    }
}
