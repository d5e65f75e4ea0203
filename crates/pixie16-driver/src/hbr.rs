//! Host bus request arbitration
//!
//! The DSP and the host share the module's internal bus. The host asks for
//! it with `REQUEST_HBR` and hands it back with `HBR_DONE`. A
//! [`HostBusRequest`] tracks whether it holds the bus so repeated requests
//! and releases write the registers once, and it releases on drop.

use crate::module::BusGuard;
use pixie16_chip::regs::{self, hbr};

/// Device the host bus access is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostBusAccess {
    /// DSP memory
    Dsp,
    /// FiPPI registers
    Fippi,
}

impl std::fmt::Display for HostBusAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dsp => write!(f, "dsp"),
            Self::Fippi => write!(f, "fippi"),
        }
    }
}

/// A held or releasable host bus request
#[derive(Debug)]
pub struct HostBusRequest<'a> {
    guard: &'a BusGuard<'a>,
    access: HostBusAccess,
    holding: bool,
}

impl<'a> HostBusRequest<'a> {
    /// Create a request; with `hold` the bus is requested immediately
    pub fn new(guard: &'a BusGuard<'a>, access: HostBusAccess, hold: bool) -> Self {
        let mut request = Self {
            guard,
            access,
            holding: false,
        };
        if hold {
            request.request();
        }
        request
    }

    /// Request the bus if not already held
    pub fn request(&mut self) {
        if !self.holding {
            self.write_request();
        }
    }

    /// Request the bus even if held
    pub fn force_request(&mut self) {
        self.write_request();
    }

    /// Release the bus if held
    pub fn release(&mut self) {
        if self.holding {
            self.write_release();
        }
    }

    /// Release the bus even if not held
    pub fn force_release(&mut self) {
        self.write_release();
    }

    /// Is the bus held?
    pub const fn holding(&self) -> bool {
        self.holding
    }

    /// Access kind
    pub const fn access(&self) -> HostBusAccess {
        self.access
    }

    fn write_request(&mut self) {
        tracing::trace!("{}hbr: {}: request", self.guard.module().label(), self.access);
        self.guard.module().write_word(regs::REQUEST_HBR, hbr::REQUEST);
        self.holding = true;
    }

    fn write_release(&mut self) {
        tracing::trace!("{}hbr: {}: release", self.guard.module().label(), self.access);
        self.guard.module().write_word(regs::HBR_DONE, hbr::RELEASE);
        self.holding = false;
    }
}

impl Drop for HostBusRequest<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimBackend;
    use crate::module::tests::sim_module;

    #[test]
    fn request_is_idempotent() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        let guard = module.bus_guard().unwrap();
        {
            let mut hbr = HostBusRequest::new(&guard, HostBusAccess::Dsp, true);
            hbr.request();
            hbr.request();
            assert!(hbr.holding());
        }
        assert_eq!(sim.writes(regs::REQUEST_HBR), vec![hbr::REQUEST]);
        assert_eq!(sim.writes(regs::HBR_DONE), vec![hbr::RELEASE]);
    }

    #[test]
    fn release_without_request_writes_nothing() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        let guard = module.bus_guard().unwrap();
        let mut hbr = HostBusRequest::new(&guard, HostBusAccess::Fippi, false);
        hbr.release();
        drop(hbr);
        assert!(sim.writes(regs::HBR_DONE).is_empty());
        assert!(sim.writes(regs::REQUEST_HBR).is_empty());
    }

    #[test]
    fn force_rewrites() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        let guard = module.bus_guard().unwrap();
        let mut hbr = HostBusRequest::new(&guard, HostBusAccess::Dsp, true);
        hbr.force_request();
        hbr.release();
        hbr.force_release();
        drop(hbr);
        assert_eq!(sim.writes(regs::REQUEST_HBR).len(), 2);
        assert_eq!(sim.writes(regs::HBR_DONE).len(), 2);
    }
}
