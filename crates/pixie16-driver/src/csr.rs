//! Host control and status register access
//!
//! Every access needs the module's bus lock, so each call takes the held
//! [`BusGuard`] and works on the module it belongs to.

use crate::module::BusGuard;
use pixie16_chip::hw::Word;
use pixie16_chip::regs::{self, csr::mask};

/// Read the CSR
pub fn read(guard: &BusGuard<'_>) -> Word {
    guard.module().read_word(regs::CSR)
}

/// Write the CSR
pub fn write(guard: &BusGuard<'_>, value: Word) {
    guard.module().write_word(regs::CSR, value);
}

/// Set the bits in `bits`
pub fn set(guard: &BusGuard<'_>, bits: Word) {
    write(guard, read(guard) | bits);
}

/// Clear the bits in `bits`
pub fn clear(guard: &BusGuard<'_>, bits: Word) {
    write(guard, read(guard) & !bits);
}

/// Return the CSR to its idle state. Only the SYNC pull-up, which the
/// backplane role owns, survives.
pub fn reset(guard: &BusGuard<'_>) {
    write(guard, read(guard) & mask(regs::csr::PULLUP_CTRL));
}

/// Sets a mask in the CSR for as long as it lives
///
/// The mask is set on construction and exactly the same mask is cleared on
/// drop, including when an error or panic unwinds through the scope.
#[derive(Debug)]
pub struct SetClear<'a> {
    guard: &'a BusGuard<'a>,
    bits: Word,
}

impl<'a> SetClear<'a> {
    /// Set `bits` until the returned value is dropped
    pub fn new(guard: &'a BusGuard<'a>, bits: Word) -> Self {
        set(guard, bits);
        Self { guard, bits }
    }
}

impl Drop for SetClear<'_> {
    fn drop(&mut self) {
        clear(self.guard, self.bits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimBackend;
    use crate::module::tests::sim_module;
    use pixie16_chip::regs::csr::{PCIACTIVE, PULLUP_CTRL, RUNENA};

    #[test]
    fn set_and_clear_touch_only_their_bits() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        let guard = module.bus_guard().unwrap();
        write(&guard, 0x8000);
        set(&guard, mask(RUNENA));
        assert_eq!(read(&guard), 0x8001);
        clear(&guard, 0x8000);
        assert_eq!(read(&guard), 0x0001);
    }

    #[test]
    fn set_clear_restores_on_early_return() {
        fn transfer(guard: &BusGuard<'_>) -> Result<(), ()> {
            let _active = SetClear::new(guard, mask(PCIACTIVE));
            assert_ne!(read(guard) & mask(PCIACTIVE), 0);
            Err(())
        }

        let sim = SimBackend::new();
        let module = sim_module(&sim);
        let guard = module.bus_guard().unwrap();
        write(&guard, mask(RUNENA));
        assert!(transfer(&guard).is_err());
        assert_eq!(read(&guard), mask(RUNENA));
    }

    #[test]
    fn reset_keeps_pullup() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        let guard = module.bus_guard().unwrap();
        write(&guard, 0xffff);
        reset(&guard);
        assert_eq!(read(&guard), mask(PULLUP_CTRL));
    }
}
