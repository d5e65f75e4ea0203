//! Host bus windows and the DSP DMA channel.
//!
//! The DSP (ADSP-21160) exposes its memory to the host through the System
//! FPGA. Block reads use the DSP's DMA channel 11 which streams into the
//! external FIFO; the PLX bridge then moves the FIFO into host memory.

use crate::hw::{Address, Word};

/// I/O buffer in DSP memory.
pub const IO_BUFFER_ADDR: Address = 0x0005_0000;
/// PLX local address of the external FIFO.
pub const FIFO_MEM_DMA: Address = 0x0020_0000;
/// PLX local address of the DSP memory DMA output.
pub const DSP_MEM_DMA: Address = 0x0030_0000;
/// PLX local address of MCA memory for DMA.
pub const MCA_MEM_DMA: Address = 0x0040_0000;
/// MCA memory data port.
pub const MCA_MEM_DATA: Address = 0x0040_0000;

/// Start of histogram memory in MCA address space.
pub const HISTOGRAM_MEMORY: Address = 0x0000_0000;

/// ADSP-21160 DMA channel status register (IOP address).
pub const DMASTAT: Address = 0x37;

/// `DMASTAT` bit set while channel 11 is active.
pub const DMASTAT_CH11_BUSY: Word = 1 << 11;

/// `DMAC11` value that enables the channel and starts the transfer.
pub const DMAC11_START: Word = 0x905;

/// `DMAC11` value that stops the channel.
pub const DMAC11_STOP: Word = 0x904;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dmac_start_stop_differ_only_in_enable() {
        assert_eq!(DMAC11_START ^ DMAC11_STOP, 1);
    }
}
