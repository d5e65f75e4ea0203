//! Hardware backend: a mapped PLX 9054 local bus.

use super::mmap::MmapRegion;
use crate::backend::{BackendType, BusBackend};
use crate::error::{PixieError, Result};
use pixie16_chip::hw::{Address, Word};
use pixie16_chip::pcie::LOCAL_BUS_BAR;

/// Value the bus returns when nothing answers.
const BUS_FLOAT: Word = 0xffff_ffff;

/// Module local bus through the mapped BAR
///
/// The PLX DMA channel belongs to the kernel driver, so block transfers are
/// done as a burst of reads with the local address held constant, the same
/// addressing mode the DMA channel is opened with.
#[derive(Debug)]
pub struct HardwareBackend {
    region: MmapRegion,
}

impl HardwareBackend {
    /// Map the local bus of the device at `pcie_address`
    ///
    /// # Errors
    ///
    /// Returns error if the BAR cannot be mapped.
    pub fn open(pcie_address: &str) -> Result<Self> {
        let region = MmapRegion::new(pcie_address, LOCAL_BUS_BAR)?;
        Ok(Self { region })
    }

    /// PCI address of the device
    pub fn pcie_address(&self) -> &str {
        self.region.pcie_address()
    }
}

impl BusBackend for HardwareBackend {
    fn read_word(&self, offset: Address) -> Word {
        self.region.read_u32(offset as usize).unwrap_or_else(|e| {
            tracing::error!("{}: {e}", self.region.pcie_address());
            BUS_FLOAT
        })
    }

    fn write_word(&self, offset: Address, value: Word) {
        if let Err(e) = self.region.write_u32(offset as usize, value) {
            tracing::error!("{}: {e}", self.region.pcie_address());
        }
    }

    fn dma_read(&self, source: Address, buffer: &mut [Word]) -> Result<()> {
        let source = source as usize;
        if source + 4 > self.region.size() {
            return Err(PixieError::dma_failure(format!(
                "DMA source out of range: {source:#x}"
            )));
        }
        for word in buffer.iter_mut() {
            *word = self.region.read_u32(source)?;
        }
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Hardware
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // Requires hardware
    fn maps_first_pixie() {
        let addr = crate::chassis::HardwareDeviceProvider::scan()
            .into_iter()
            .next()
            .expect("no Pixie-16 found");
        let backend = HardwareBackend::open(&addr).expect("map failed");
        let version = backend.read_word(pixie16_chip::regs::CFG_RDVER);
        assert_ne!(version, BUS_FLOAT);
    }

    #[test]
    fn missing_device_fails_to_map() {
        assert!(HardwareBackend::open("ffff:ff:1f.7").is_err());
    }
}
