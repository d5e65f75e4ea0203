//! FPGA bitstream loader
//!
//! An FPGA is loaded in three phases through the boot CPLD:
//!
//! 1. Clear: drive PROGB low then high and wait for the clear done bits.
//! 2. Program: stream the image as little-endian words into the data
//!    register.
//! 3. Done: wait for the load done bits.
//!
//! A timeout in either wait costs a retry and adds to the backoff, the
//! number of dummy status reads after each register write. After a clear
//! timeout the clear is repeated; after a done timeout the load starts
//! again from the clear.

use crate::config::LoadTiming;
use crate::error::{PixieError, Result};
use crate::firmware::FirmwareImage;
use crate::module::Module;
use crate::wait;
use pixie16_chip::fpga::{comms, fippi, Controls, Regs, CPLD_REGS};
use pixie16_chip::hw::Word;
use pixie16_chip::regs;
use tracing::{debug, info, warn};

/// Controls and registers of one FPGA or FPGA pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpgaControl {
    name: &'static str,
    load_ctrl: Controls,
    clear_ctrl: Controls,
    regs: Regs,
}

impl FpgaControl {
    /// Create a control
    pub const fn new(name: &'static str, load_ctrl: Controls, clear_ctrl: Controls, regs: Regs) -> Self {
        Self {
            name,
            load_ctrl,
            clear_ctrl,
            regs,
        }
    }

    /// Communications (System) FPGA
    pub const fn comms() -> Self {
        Self::new(comms::NAME, comms::LOAD, comms::CLEAR, CPLD_REGS)
    }

    /// FiPPIs 1 and 2
    pub const fn fippi_1_2() -> Self {
        Self::new(fippi::NAME_1_2, fippi::LOAD_1_2, fippi::CLEAR_1_2, CPLD_REGS)
    }

    /// FiPPIs 3 and 4
    pub const fn fippi_3_4() -> Self {
        Self::new(fippi::NAME_3_4, fippi::LOAD_3_4, fippi::CLEAR_3_4, CPLD_REGS)
    }

    /// Label
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Are the load done bits set?
    pub fn done(&self, module: &Module) -> bool {
        self.load_ctrl.is_done(module.read_word(self.regs.read_status))
    }

    /// Load an image
    ///
    /// `backoff` is the starting number of dummy reads after each write.
    /// Returns the backoff in use when the load completed, for the next
    /// FPGA on the same module.
    ///
    /// # Errors
    ///
    /// - `DeviceImageFailure` for an empty image; no retries are spent
    /// - `DeviceLoadFailure` when the retries are used up
    pub fn load(
        &self,
        module: &Module,
        image: &FirmwareImage,
        mut backoff: u32,
        mut retries: u32,
        timing: &LoadTiming,
    ) -> Result<u32> {
        info!(
            "{}fpga-{}: load: length={} retries={retries} clear-controls: \
             clear={:#x},set={:#x},done={:#x} load-controls: clear={:#x},set={:#x},done={:#x}",
            module.label(),
            self.name,
            image.len(),
            self.clear_ctrl.clear,
            self.clear_ctrl.set,
            self.clear_ctrl.done,
            self.load_ctrl.clear,
            self.load_ctrl.set,
            self.load_ctrl.done
        );

        if image.is_empty() {
            return Err(module.error(PixieError::image_failure("no image loaded")));
        }

        let _guard = module.bus_guard()?;

        loop {
            loop {
                debug!(
                    "{}fpga-{}: clearing: retries={retries} backoff={backoff}",
                    module.label(),
                    self.name
                );
                self.control(module, &self.clear_ctrl, backoff);
                wait::usecs(timing.settle_us);
                self.control(module, &self.load_ctrl, backoff);

                if self.poll(module, &self.clear_ctrl, timing.clear_polls, timing.clear_poll_us) {
                    break;
                }

                retries = retries.saturating_sub(1);
                if retries == 0 {
                    return Err(
                        module.error(PixieError::load_failure(self.what("clear failure"))),
                    );
                }
                backoff += timing.backoff_step;
                warn!(
                    "{}fpga-{}: clear timeout: retries={retries} backoff={backoff}",
                    module.label(),
                    self.name
                );
            }

            debug!("{}fpga-{}: programming", module.label(), self.name);
            for word in image.words() {
                self.write(module, self.regs.data, word, backoff);
            }

            debug!("{}fpga-{}: waiting for done", module.label(), self.name);
            if self.poll(module, &self.load_ctrl, timing.done_polls, timing.done_poll_us) {
                debug!("{}fpga-{}: done", module.label(), self.name);
                return Ok(backoff);
            }

            retries = retries.saturating_sub(1);
            if retries == 0 {
                return Err(module.error(PixieError::load_failure(
                    self.what("programming failure"),
                )));
            }
            backoff += timing.backoff_step;
            warn!(
                "{}fpga-{}: done timeout: retries={retries} backoff={backoff}",
                module.label(),
                self.name
            );
        }
    }

    fn control(&self, module: &Module, ctrl: &Controls, backoff: u32) {
        let value = ctrl.apply(module.read_word(self.regs.read_status));
        self.write(module, self.regs.control, value, backoff);
    }

    fn write(&self, module: &Module, reg: u32, value: Word, backoff: u32) {
        module.write_word(reg, value);
        for _ in 0..backoff {
            module.read_word(self.regs.read_status);
        }
    }

    fn poll(&self, module: &Module, ctrl: &Controls, polls: usize, period_us: u64) -> bool {
        for _ in 0..polls {
            wait::usecs(period_us);
            if ctrl.is_done(module.read_word(self.regs.read_status)) {
                return true;
            }
        }
        false
    }

    fn what(&self, msg: &str) -> String {
        format!("fpga-{} {msg}", self.name)
    }
}

/// Is the communications FPGA loaded?
pub fn comms_done(module: &Module) -> bool {
    FpgaControl::comms().done(module)
}

/// Are all the FiPPIs loaded?
pub fn fippi_done(module: &Module) -> bool {
    FpgaControl::fippi_1_2().done(module) && FpgaControl::fippi_3_4().done(module)
}

/// Load the communications FPGA
///
/// # Errors
///
/// As [`FpgaControl::load`].
pub fn boot_comms(
    module: &Module,
    image: &FirmwareImage,
    backoff: u32,
    retries: u32,
    timing: &LoadTiming,
) -> Result<u32> {
    FpgaControl::comms().load(module, image, backoff, retries, timing)
}

/// Load both FiPPI pairs with the same image and reset the DCM
///
/// # Errors
///
/// As [`FpgaControl::load`].
pub fn boot_fippi(
    module: &Module,
    image: &FirmwareImage,
    backoff: u32,
    retries: u32,
    timing: &LoadTiming,
) -> Result<u32> {
    let backoff = FpgaControl::fippi_1_2().load(module, image, backoff, retries, timing)?;
    let backoff = FpgaControl::fippi_3_4().load(module, image, backoff, retries, timing)?;
    wait::usecs(timing.dcm_reset_us);
    module.write_word(regs::CFG_DCMRST, 0);
    Ok(backoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimBackend;
    use crate::module::tests::sim_module;
    use crate::ErrorCode;

    fn image(bytes: &[u8]) -> FirmwareImage {
        FirmwareImage::new("sys", bytes.to_vec()).unwrap()
    }

    #[test]
    fn twelve_byte_image_writes_three_words() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        let image = image(&[
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c,
        ]);
        let backoff = FpgaControl::comms()
            .load(&module, &image, 0, 10, &LoadTiming::immediate(250))
            .unwrap();
        assert_eq!(backoff, 0);
        assert_eq!(
            sim.writes(regs::CFG_DATACS),
            vec![0x0403_0201, 0x0807_0605, 0x0c0b_0a09]
        );
    }

    #[test]
    fn never_done_uses_every_retry() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        // INIT high, DONE never.
        sim.set_register(regs::CFG_RDCS, 0x001);
        let err = FpgaControl::comms()
            .load(&module, &image(&[0u8; 12]), 0, 3, &LoadTiming::immediate(250))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeviceLoadFailure);
        assert_eq!(
            err.to_string(),
            "module 2 slot 2: FPGA load failure: fpga-sys programming failure"
        );
        assert_eq!(sim.writes(regs::CFG_DATACS).len(), 9);
    }

    #[test]
    fn partial_trailing_word_is_not_written() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        FpgaControl::comms()
            .load(&module, &image(&[1, 2, 3, 4, 5]), 0, 10, &LoadTiming::immediate(250))
            .unwrap();
        assert_eq!(sim.writes(regs::CFG_DATACS), vec![0x0403_0201]);
    }

    #[test]
    fn clear_failure() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        sim.set_register(regs::CFG_RDCS, 0);
        let err = FpgaControl::comms()
            .load(&module, &image(&[0u8; 4]), 0, 2, &LoadTiming::immediate(10))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeviceLoadFailure);
        assert!(err.to_string().contains("fpga-sys clear failure"));
        assert!(sim.writes(regs::CFG_DATACS).is_empty());
        assert_eq!(sim.writes(regs::CFG_CTRLCS).len(), 4);
    }

    #[test]
    fn empty_image_spends_no_retries() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        let err = FpgaControl::comms()
            .load(&module, &image(&[]), 0, 10, &LoadTiming::immediate(10))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeviceImageFailure);
        assert!(err.to_string().starts_with("module 2 slot 2: "));
        assert!(sim.write_log().is_empty());
    }

    #[test]
    fn late_done_within_budget_succeeds() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        let mut reads = 0;
        sim.on_read(regs::CFG_RDCS, move || {
            reads += 1;
            // Two control reads, then clear done on the 3rd poll and load
            // done on the 4th.
            match reads {
                1..=4 => 0,
                5..=8 => 0x001,
                _ => 0x003,
            }
        });
        let backoff = FpgaControl::comms()
            .load(&module, &image(&[0u8; 8]), 0, 1, &LoadTiming::immediate(10))
            .unwrap();
        assert_eq!(backoff, 0);
        assert_eq!(sim.writes(regs::CFG_DATACS).len(), 2);
    }

    #[test]
    fn backoff_grows_per_retry() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        let mut reads = 0;
        // The first clear never completes; every later read is done.
        sim.on_read(regs::CFG_RDCS, move || {
            reads += 1;
            if reads <= 12 {
                0
            } else {
                Word::MAX
            }
        });
        let timing = LoadTiming::immediate(10);
        let backoff = FpgaControl::comms()
            .load(&module, &image(&[0u8; 4]), 0, 5, &timing)
            .unwrap();
        assert_eq!(backoff, timing.backoff_step);
    }

    #[test]
    fn fippi_boot_resets_dcm() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        let image = FirmwareImage::new("fippi", vec![0u8; 8]).unwrap();
        boot_fippi(&module, &image, 0, 10, &LoadTiming::immediate(10)).unwrap();
        assert_eq!(sim.writes(regs::CFG_DATACS).len(), 4);
        assert_eq!(sim.writes(regs::CFG_DCMRST), vec![0]);
        assert!(fippi_done(&module));
    }
}
