//! Bus backend abstraction
//!
//! A module talks to its System FPGA through 32-bit register accesses on
//! the local bus and moves blocks with the PLX DMA engine. The backend
//! hides whether that bus is a mapped PCI BAR or a simulated register file.

use crate::error::Result;
use pixie16_chip::hw::{Address, Word};
use std::fmt::Debug;

/// Local bus access for one module
///
/// Register accesses cannot fail once a module is open; the bus reads all
/// ones for an address nothing answers. Only the DMA transfer reports
/// errors.
pub trait BusBackend: Debug + Send + Sync {
    /// Read a 32-bit register
    fn read_word(&self, offset: Address) -> Word;

    /// Write a 32-bit register
    fn write_word(&self, offset: Address, value: Word);

    /// Block transfer from a local bus address with the address held
    /// constant, filling `buffer`
    ///
    /// # Errors
    ///
    /// Returns error if the transfer does not complete.
    fn dma_read(&self, source: Address, buffer: &mut [Word]) -> Result<()>;

    /// Get backend type for debugging
    fn backend_type(&self) -> BackendType;
}

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Mapped PCI BAR of a real module
    Hardware,

    /// Register file simulation, no hardware required
    Simulated,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hardware => write!(f, "Hardware"),
            Self::Simulated => write!(f, "Simulated"),
        }
    }
}

/// Backend selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSelection {
    /// Hardware if the device's BAR can be mapped, otherwise simulated
    Auto,

    /// Force the hardware backend
    Hardware,

    /// Force the simulated backend
    Simulated,
}

/// Select a backend for the PCI device at `pcie_address`
///
/// # Errors
///
/// Returns error if hardware is forced and the BAR cannot be mapped.
pub fn select_backend(
    selection: BackendSelection,
    pcie_address: &str,
) -> Result<Box<dyn BusBackend>> {
    use crate::backends::{HardwareBackend, SimBackend};

    match selection {
        BackendSelection::Hardware => Ok(Box::new(HardwareBackend::open(pcie_address)?)),
        BackendSelection::Simulated => Ok(Box::new(SimBackend::new())),
        BackendSelection::Auto => match HardwareBackend::open(pcie_address) {
            Ok(backend) => Ok(Box::new(backend)),
            Err(e) => {
                tracing::warn!("{pcie_address}: hardware unavailable, simulating: {e}");
                Ok(Box::new(SimBackend::new()))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_simulation_needs_no_device() {
        let backend = select_backend(BackendSelection::Simulated, "0000:00:00.0").unwrap();
        assert_eq!(backend.backend_type(), BackendType::Simulated);
        assert_eq!(backend.backend_type().to_string(), "Simulated");
    }

    #[test]
    fn auto_falls_back_without_device() {
        let backend = select_backend(BackendSelection::Auto, "ffff:ff:1f.7").unwrap();
        assert_eq!(backend.backend_type(), BackendType::Simulated);
    }
}
