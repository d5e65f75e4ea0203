//! Module memory access over the host bus
//!
//! - [`HostBus`]: DSP memory and FiPPI registers through the DSP's host
//!   port, with block reads streamed by DSP DMA channel 11
//! - [`Mca`]: histogram (MCA) memory
//! - [`Fifo`]: the external list mode FIFO
//!
//! # Block reads
//!
//! Long reads are split into bursts of at most `max_block_words`. Each burst
//! programs DMA channel 11 to copy DSP memory into the internal FIFO and the
//! PLX DMA engine drains the FIFO into the caller's buffer. A remainder of
//! `min_dma_words` or fewer is read one word at a time.

use crate::csr::SetClear;
use crate::config::DmaConfig;
use crate::error::{PixieError, Result};
use crate::fifo;
use crate::hbr::{HostBusAccess, HostBusRequest};
use crate::module::{BusGuard, Module};
use pixie16_chip::hw::{Address, Word, LARGE_HISTOGRAM_LENGTH};
use pixie16_chip::memory::{
    DMAC11_START, DMAC11_STOP, DMASTAT, DMASTAT_CH11_BUSY, DSP_MEM_DMA, FIFO_MEM_DMA,
    HISTOGRAM_MEMORY, MCA_MEM_DATA,
};
use pixie16_chip::regs::{self, csr::mask};
use tracing::debug;

/// How a block read is split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPlan {
    /// DMA burst lengths in order
    pub bursts: Vec<usize>,
    /// Words read by polled I/O after the bursts
    pub pio_words: usize,
}

/// Split a read of `len` words into DMA bursts and a polled tail
pub fn plan_chunks(len: usize, cfg: &DmaConfig) -> BlockPlan {
    let max_block = cfg.max_block_words.max(1);
    let mut bursts = Vec::new();
    let mut remaining = len;
    while remaining > cfg.min_dma_words {
        let block = remaining.min(max_block);
        bursts.push(block);
        remaining -= block;
    }
    BlockPlan {
        bursts,
        pio_words: remaining,
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn offset_address(addr: Address, offset: usize) -> Address {
    addr.wrapping_add(offset as Address)
}

fn word_count(len: usize) -> Result<Word> {
    Word::try_from(len).map_err(|_| PixieError::invalid_param(format!("transfer too long: {len}")))
}

/// DSP host port access
#[derive(Debug, Clone, Copy)]
pub struct HostBus<'m> {
    module: &'m Module,
    access: HostBusAccess,
}

impl<'m> HostBus<'m> {
    /// DSP memory
    pub const fn dsp(module: &'m Module) -> Self {
        Self {
            module,
            access: HostBusAccess::Dsp,
        }
    }

    /// FiPPI registers
    pub const fn fippi(module: &'m Module) -> Self {
        Self {
            module,
            access: HostBusAccess::Fippi,
        }
    }

    /// Read a word
    ///
    /// # Errors
    ///
    /// `InternalFailure` if the bus lock is poisoned.
    pub fn read(&self, addr: Address) -> Result<Word> {
        let guard = self.module.bus_guard()?;
        let _hbr = HostBusRequest::new(&guard, self.access, true);
        self.module.write_word(regs::EXT_MEM_TEST, addr);
        Ok(self.module.read_word(regs::WRT_DSP_MMA))
    }

    /// Read a word of a channel's block
    ///
    /// # Errors
    ///
    /// `ChannelInvalidIndex` if the channel has no DSP index.
    pub fn read_channel(&self, channel: usize, offset: usize, addr: Address) -> Result<Word> {
        let index = self.module.channel_index(channel).map_err(|e| self.module.error(e))?;
        self.read(offset_address(addr.wrapping_add(index), offset))
    }

    /// Write a word
    ///
    /// # Errors
    ///
    /// `InternalFailure` if the bus lock is poisoned.
    pub fn write(&self, addr: Address, value: Word) -> Result<()> {
        let guard = self.module.bus_guard()?;
        let _hbr = HostBusRequest::new(&guard, self.access, true);
        self.module.write_word(regs::EXT_MEM_TEST, addr);
        self.module.write_word(regs::WRT_DSP_MMA, value);
        Ok(())
    }

    /// Write a word of a channel's block
    ///
    /// # Errors
    ///
    /// `ChannelInvalidIndex` if the channel has no DSP index.
    pub fn write_channel(
        &self,
        channel: usize,
        offset: usize,
        addr: Address,
        value: Word,
    ) -> Result<()> {
        let index = self.module.channel_index(channel).map_err(|e| self.module.error(e))?;
        self.write(offset_address(addr.wrapping_add(index), offset), value)
    }

    /// Write consecutive words
    ///
    /// # Errors
    ///
    /// `InternalFailure` if the bus lock is poisoned.
    pub fn write_block(&self, addr: Address, values: &[Word]) -> Result<()> {
        let guard = self.module.bus_guard()?;
        let _hbr = HostBusRequest::new(&guard, self.access, true);
        self.module.write_word(regs::EXT_MEM_TEST, addr);
        for value in values {
            self.module.write_word(regs::WRT_DSP_MMA, *value);
        }
        Ok(())
    }

    /// Read `buffer.len()` consecutive words
    ///
    /// The bus lock is held for the whole read.
    ///
    /// # Errors
    ///
    /// `ModuleOffline` if the module is offline, whatever the length, or
    /// any error from [`HostBus::dma_read`].
    pub fn read_block(&self, addr: Address, buffer: &mut [Word]) -> Result<()> {
        self.module.online_check()?;
        let guard = self.module.bus_guard()?;
        let plan = plan_chunks(buffer.len(), self.module.dma_config());

        let mut offset = 0;
        for burst in plan.bursts {
            self.dma_read(
                &guard,
                offset_address(addr, offset),
                &mut buffer[offset..offset + burst],
            )?;
            offset += burst;
        }

        if plan.pio_words > 0 {
            let _hbr = HostBusRequest::new(&guard, self.access, true);
            self.module
                .write_word(regs::EXT_MEM_TEST, offset_address(addr, offset));
            for word in &mut buffer[offset..] {
                *word = self.module.read_word(regs::WRT_DSP_MMA);
            }
        }
        Ok(())
    }

    /// One DMA burst from DSP memory
    ///
    /// Whatever happens once the channel is programmed, the host bus is
    /// requested again and the channel stopped before returning.
    ///
    /// # Errors
    ///
    /// - `DeviceDmaBusy` if channel 11 is already active; nothing is programmed
    /// - `DeviceFifoFailure` if the internal FIFO does not fill
    /// - `DeviceDmaFailure` if the PLX transfer fails
    pub fn dma_read(&self, guard: &BusGuard<'_>, addr: Address, buffer: &mut [Word]) -> Result<()> {
        let module = self.module;
        debug!(
            "{}{} dma read: addr={addr:#x} length={}",
            module.label(),
            self.access,
            buffer.len()
        );

        if !std::ptr::eq(guard.module(), module) {
            return Err(module.error(PixieError::dma_failure("bus lock not held")));
        }

        let len = word_count(buffer.len()).map_err(|e| module.error(e))?;

        let mut hbr = HostBusRequest::new(guard, self.access, true);

        module.write_word(regs::EXT_MEM_TEST, DMASTAT);
        if module.read_word(regs::WRT_DSP_MMA) & DMASTAT_CH11_BUSY != 0 {
            return Err(module.error(PixieError::dma_busy("dsp: DMA busy")));
        }

        module.write_word(regs::WRT_DSP_II11, addr);
        module.write_word(regs::WRT_DSP_C11, len);
        module.write_word(regs::WRT_DSP_IM11, 1);
        module.write_word(regs::WRT_DSP_EC11, len);
        module.write_word(regs::WRT_DSP_DMAC11, DMAC11_START);
        module.write_word(regs::RD_WRT_FIFO_WML, len / 2);

        hbr.release();

        let result = self.drain(guard, len / 2, buffer);

        hbr.request();
        module.write_word(regs::WRT_DSP_DMAC11, DMAC11_STOP);

        result
    }

    fn drain(&self, guard: &BusGuard<'_>, watermark: Word, buffer: &mut [Word]) -> Result<()> {
        self.module.write_word(regs::SET_INT_FIFO, 0);
        fifo::watermark_wait(guard, watermark as usize, self.module.dma_config().fifo_polls)?;
        self.module.dma_read(guard, DSP_MEM_DMA, buffer)
    }
}

/// Histogram (MCA) memory
///
/// Transfers hold `PCIACTIVE` in the CSR so the DSP keeps off the memory.
#[derive(Debug, Clone, Copy)]
pub struct Mca<'m> {
    module: &'m Module,
}

impl<'m> Mca<'m> {
    /// MCA memory of `module`
    pub const fn new(module: &'m Module) -> Self {
        Self { module }
    }

    /// DMA `buffer.len()` words from `addr`
    ///
    /// # Errors
    ///
    /// `ModuleOffline` or `DeviceDmaFailure` from the transfer.
    pub fn read(&self, addr: Address, buffer: &mut [Word]) -> Result<()> {
        let guard = self.module.bus_guard()?;
        let _active = SetClear::new(&guard, mask(regs::csr::PCIACTIVE));
        self.module.write_word(regs::WRT_EXT_MEM, addr);
        self.module.write_word(regs::SET_EXMEM_FIFO, 0);
        self.module.dma_read(&guard, MCA_MEM_DATA, buffer)
    }

    /// Write `values` from `addr`
    ///
    /// # Errors
    ///
    /// `InternalFailure` if the bus lock is poisoned.
    pub fn write(&self, addr: Address, values: &[Word]) -> Result<()> {
        let guard = self.module.bus_guard()?;
        let _active = SetClear::new(&guard, mask(regs::csr::PCIACTIVE));
        self.module.write_word(regs::WRT_EXT_MEM, addr);
        for value in values {
            self.module.write_word(MCA_MEM_DATA, *value);
        }
        Ok(())
    }

    /// Read the start of a channel's histogram
    ///
    /// # Errors
    ///
    /// `ChannelNumberInvalid` for a bad channel, `ModuleInvalidParam` if the
    /// buffer is longer than a histogram.
    pub fn read_histogram(&self, channel: usize, buffer: &mut [Word]) -> Result<()> {
        self.module.channel_check(channel)?;
        if buffer.len() > LARGE_HISTOGRAM_LENGTH {
            return Err(self.module.error(PixieError::invalid_param(format!(
                "histogram length too long: {}",
                buffer.len()
            ))));
        }
        let addr = offset_address(HISTOGRAM_MEMORY, channel * LARGE_HISTOGRAM_LENGTH);
        self.read(addr, buffer)
    }
}

/// External list mode FIFO
#[derive(Debug, Clone, Copy)]
pub struct Fifo<'m> {
    module: &'m Module,
}

impl<'m> Fifo<'m> {
    /// FIFO of `module`
    pub const fn new(module: &'m Module) -> Self {
        Self { module }
    }

    /// Words waiting in the FIFO
    ///
    /// # Errors
    ///
    /// `InternalFailure` if the bus lock is poisoned.
    pub fn level(&self) -> Result<usize> {
        let _guard = self.module.bus_guard()?;
        Ok(self.module.read_word(regs::RD_WRT_FIFO_WML) as usize)
    }

    /// Read `buffer.len()` words
    ///
    /// # Errors
    ///
    /// `DeviceFifoFailure` if the FIFO does not hold that many words, or a
    /// transfer error.
    pub fn read(&self, buffer: &mut [Word]) -> Result<()> {
        let guard = self.module.bus_guard()?;
        let len = word_count(buffer.len()).map_err(|e| self.module.error(e))?;
        self.module.write_word(regs::SET_EXT_FIFO, len);
        fifo::watermark_wait(&guard, buffer.len(), self.module.dma_config().fifo_polls)?;
        self.module.dma_read(&guard, FIFO_MEM_DMA, buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimBackend;
    use crate::module::tests::sim_module;
    use crate::ErrorCode;
    use pixie16_chip::regs::hbr;

    #[test]
    fn plan_splits_large_reads() {
        let plan = plan_chunks(10_000, &DmaConfig::default());
        assert_eq!(plan.bursts, vec![8192, 1808]);
        assert_eq!(plan.pio_words, 0);
    }

    #[test]
    fn plan_short_reads_use_pio() {
        let cfg = DmaConfig::default();
        assert_eq!(plan_chunks(48, &cfg).bursts, Vec::<usize>::new());
        assert_eq!(plan_chunks(48, &cfg).pio_words, 48);
        assert_eq!(plan_chunks(49, &cfg).bursts, vec![49]);
        assert_eq!(plan_chunks(0, &cfg).pio_words, 0);
    }

    #[test]
    fn word_read_requests_and_releases() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        sim.set_dsp_words(0x4_a000, &[0xdead]);
        assert_eq!(HostBus::dsp(&module).read(0x4_a000).unwrap(), 0xdead);
        assert_eq!(sim.writes(regs::REQUEST_HBR), vec![hbr::REQUEST]);
        assert_eq!(sim.writes(regs::HBR_DONE), vec![hbr::RELEASE]);
    }

    #[test]
    fn channel_access_uses_index() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        let dsp = HostBus::dsp(&module);
        dsp.write_channel(3, 16, 0x4_a000, 42).unwrap();
        assert_eq!(sim.dsp_word(0x4_a000 + 3 + 16), 42);
        assert_eq!(dsp.read_channel(3, 16, 0x4_a000).unwrap(), 42);
    }

    #[test]
    fn short_block_is_polled() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        let data: Vec<Word> = (0..40).collect();
        sim.set_dsp_words(0x5_0000, &data);
        let mut buf = vec![0; 40];
        HostBus::dsp(&module).read_block(0x5_0000, &mut buf).unwrap();
        assert_eq!(buf, data);
        assert!(sim.dma_log().is_empty());
    }

    #[test]
    fn long_block_uses_dma() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        let data: Vec<Word> = (0..300).map(|i| i * 3).collect();
        sim.set_dsp_words(0x5_0000, &data);
        let mut buf = vec![0; 300];
        HostBus::dsp(&module).read_block(0x5_0000, &mut buf).unwrap();
        assert_eq!(buf, data);
        assert_eq!(sim.dma_log(), vec![(DSP_MEM_DMA, 300)]);
        assert_eq!(
            sim.writes(regs::WRT_DSP_DMAC11),
            vec![DMAC11_START, DMAC11_STOP]
        );
        assert_eq!(sim.writes(regs::RD_WRT_FIFO_WML), vec![150]);
    }

    #[test]
    fn busy_channel_programs_nothing() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        sim.set_dsp_words(DMASTAT, &[DMASTAT_CH11_BUSY]);
        let mut buf = vec![0; 100];
        let err = HostBus::dsp(&module).read_block(0, &mut buf).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeviceDmaBusy);
        assert!(sim.writes(regs::WRT_DSP_II11).is_empty());
        assert!(sim.writes(regs::WRT_DSP_DMAC11).is_empty());
        assert_eq!(sim.writes(regs::HBR_DONE).len(), 1);
    }

    #[test]
    fn mca_transfers_hold_pciactive() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        let mca = Mca::new(&module);
        mca.write(0x100, &[5, 6, 7]).unwrap();
        let csr_writes = sim.writes(regs::CSR);
        assert_eq!(csr_writes, vec![mask(regs::csr::PCIACTIVE), 0]);

        let mut buf = [0; 3];
        mca.read(0x100, &mut buf).unwrap();
        assert_eq!(buf, [5, 6, 7]);
        assert_eq!(sim.register(regs::CSR), 0);
    }

    #[test]
    fn histogram_channel_offset() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        sim.set_mca_words(2 * LARGE_HISTOGRAM_LENGTH, &[9, 8]);
        let mut buf = [0; 2];
        Mca::new(&module).read_histogram(2, &mut buf).unwrap();
        assert_eq!(buf, [9, 8]);
    }

    #[test]
    fn fifo_read() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        sim.push_fifo(&[1, 2, 3, 4, 5]);
        let fifo = Fifo::new(&module);
        assert_eq!(fifo.level().unwrap(), 5);
        let mut buf = [0; 4];
        fifo.read(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(sim.writes(regs::SET_EXT_FIFO), vec![4]);
        assert_eq!(fifo.level().unwrap(), 1);
    }

    #[test]
    fn fifo_short_of_data_fails() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        sim.push_fifo(&[1]);
        let mut buf = [0; 4];
        let err = Fifo::new(&module).read(&mut buf).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeviceFifoFailure);
        assert!(sim.dma_log().is_empty());
    }
}
