//! Simulated module local bus
//!
//! A register file with enough of the System FPGA behaviour to run the bus
//! protocols without hardware:
//!
//! - `EXT_MEM_TEST` loads the DSP address pointer; `WRT_DSP_MMA` reads and
//!   writes DSP memory through it with auto-increment.
//! - Starting DMA channel 11 (`WRT_DSP_DMAC11 := 0x905`) streams `C11` words
//!   from `II11` into the internal FIFO; `DSP_MEM_DMA` drains it.
//! - `WRT_EXT_MEM` loads the MCA address; `MCA_MEM_DATA` writes and DMA
//!   reads MCA memory through it.
//! - `RD_WRT_FIFO_WML` reads the level of the FIFO last selected with
//!   `SET_INT_FIFO` or `SET_EXT_FIFO`; the external FIFO is filled by tests.
//! - `CFG_RDCS` reads all ones so every FPGA phase completes at once.
//!
//! Every write is logged, reads are counted, and any register can be given a
//! read hook to script hardware behaviour.

use crate::backend::{BackendType, BusBackend};
use crate::error::{PixieError, Result};
use parking_lot::Mutex;
use pixie16_chip::hw::{Address, Word};
use pixie16_chip::memory::{DMAC11_START, DMAC11_STOP, DSP_MEM_DMA, FIFO_MEM_DMA, MCA_MEM_DATA};
use pixie16_chip::regs;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Scripted value for a register read. Hooks run with the simulator locked
/// and must not call back into it.
pub type ReadHook = Box<dyn FnMut() -> Word + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FifoRoute {
    Internal,
    External,
}

#[derive(Default)]
struct State {
    regs: HashMap<Address, Word>,
    hooks: HashMap<Address, ReadHook>,
    reads: HashMap<Address, usize>,
    writes: Vec<(Address, Word)>,
    dsp: HashMap<Address, Word>,
    dsp_ptr: Address,
    mca: Vec<Word>,
    mca_ptr: usize,
    internal_fifo: VecDeque<Word>,
    external_fifo: VecDeque<Word>,
    route: Option<FifoRoute>,
    dma_log: Vec<(Address, usize)>,
    dma_fault: Option<String>,
}

impl State {
    fn register(&self, offset: Address) -> Word {
        match self.regs.get(&offset) {
            Some(value) => *value,
            None if offset == regs::CFG_RDCS => Word::MAX,
            None => 0,
        }
    }

    fn fifo_level(&self) -> Word {
        let level = match self.route.unwrap_or(FifoRoute::External) {
            FifoRoute::Internal => self.internal_fifo.len(),
            FifoRoute::External => self.external_fifo.len(),
        };
        Word::try_from(level).unwrap_or(Word::MAX)
    }

    fn start_dsp_dma(&mut self) {
        let source = self.register(regs::WRT_DSP_II11);
        let count = self.register(regs::WRT_DSP_C11);
        self.internal_fifo.clear();
        for addr in source..source.saturating_add(count) {
            let value = self.dsp.get(&addr).copied().unwrap_or(0);
            self.internal_fifo.push_back(value);
        }
    }

    fn mca_write(&mut self, value: Word) {
        if self.mca_ptr >= self.mca.len() {
            self.mca.resize(self.mca_ptr + 1, 0);
        }
        self.mca[self.mca_ptr] = value;
        self.mca_ptr += 1;
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("regs", &self.regs.len())
            .field("hooks", &self.hooks.len())
            .field("writes", &self.writes.len())
            .field("dsp_ptr", &self.dsp_ptr)
            .field("mca_ptr", &self.mca_ptr)
            .field("internal_fifo", &self.internal_fifo.len())
            .field("external_fifo", &self.external_fifo.len())
            .finish_non_exhaustive()
    }
}

/// Simulated local bus
///
/// Clones share the same state, so a test can keep a handle to a backend it
/// has given to a module.
#[derive(Debug, Clone, Default)]
pub struct SimBackend {
    state: Arc<Mutex<State>>,
}

impl SimBackend {
    /// Create a simulator with every register cleared
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a register, ignoring hooks
    pub fn register(&self, offset: Address) -> Word {
        self.state.lock().register(offset)
    }

    /// Set a register's value
    pub fn set_register(&self, offset: Address, value: Word) {
        self.state.lock().regs.insert(offset, value);
    }

    /// Script reads of `offset`
    pub fn on_read(&self, offset: Address, hook: impl FnMut() -> Word + Send + 'static) {
        self.state.lock().hooks.insert(offset, Box::new(hook));
    }

    /// Remove a read hook
    pub fn clear_hook(&self, offset: Address) {
        self.state.lock().hooks.remove(&offset);
    }

    /// Values written to `offset`, oldest first
    pub fn writes(&self, offset: Address) -> Vec<Word> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(reg, _)| *reg == offset)
            .map(|(_, value)| *value)
            .collect()
    }

    /// Every write in bus order
    pub fn write_log(&self) -> Vec<(Address, Word)> {
        self.state.lock().writes.clone()
    }

    /// Number of reads of `offset`
    pub fn reads(&self, offset: Address) -> usize {
        self.state.lock().reads.get(&offset).copied().unwrap_or(0)
    }

    /// Forget logged writes, read counts and DMA transfers
    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.writes.clear();
        state.reads.clear();
        state.dma_log.clear();
    }

    /// DMA transfers performed, as `(source, words)`
    pub fn dma_log(&self) -> Vec<(Address, usize)> {
        self.state.lock().dma_log.clone()
    }

    /// Make the next DMA transfer fail
    pub fn fail_next_dma(&self, reason: impl Into<String>) {
        self.state.lock().dma_fault = Some(reason.into());
    }

    /// Read a DSP memory word
    pub fn dsp_word(&self, addr: Address) -> Word {
        self.state.lock().dsp.get(&addr).copied().unwrap_or(0)
    }

    /// Fill DSP memory from `addr`
    pub fn set_dsp_words(&self, addr: Address, values: &[Word]) {
        let mut state = self.state.lock();
        for (addr, value) in (addr..).zip(values) {
            state.dsp.insert(addr, *value);
        }
    }

    /// Read `len` MCA memory words from `addr`
    pub fn mca_words(&self, addr: usize, len: usize) -> Vec<Word> {
        let state = self.state.lock();
        (addr..addr + len)
            .map(|a| state.mca.get(a).copied().unwrap_or(0))
            .collect()
    }

    /// Fill MCA memory from `addr`
    pub fn set_mca_words(&self, addr: usize, values: &[Word]) {
        let mut state = self.state.lock();
        state.mca_ptr = addr;
        for value in values {
            state.mca_write(*value);
        }
    }

    /// Queue words in the external FIFO
    pub fn push_fifo(&self, values: &[Word]) {
        self.state.lock().external_fifo.extend(values.iter().copied());
    }
}

impl BusBackend for SimBackend {
    fn read_word(&self, offset: Address) -> Word {
        let mut state = self.state.lock();
        *state.reads.entry(offset).or_insert(0) += 1;
        if let Some(hook) = state.hooks.get_mut(&offset) {
            return hook();
        }
        match offset {
            regs::WRT_DSP_MMA => {
                let addr = state.dsp_ptr;
                state.dsp_ptr = addr.wrapping_add(1);
                state.dsp.get(&addr).copied().unwrap_or(0)
            }
            regs::RD_WRT_FIFO_WML => state.fifo_level(),
            _ => state.register(offset),
        }
    }

    fn write_word(&self, offset: Address, value: Word) {
        let mut state = self.state.lock();
        state.writes.push((offset, value));
        match offset {
            regs::EXT_MEM_TEST => state.dsp_ptr = value,
            regs::WRT_DSP_MMA => {
                let addr = state.dsp_ptr;
                state.dsp.insert(addr, value);
                state.dsp_ptr = addr.wrapping_add(1);
            }
            regs::WRT_EXT_MEM => state.mca_ptr = value as usize,
            MCA_MEM_DATA => state.mca_write(value),
            regs::SET_INT_FIFO => state.route = Some(FifoRoute::Internal),
            regs::SET_EXT_FIFO => state.route = Some(FifoRoute::External),
            regs::WRT_DSP_DMAC11 if value == DMAC11_START => {
                state.regs.insert(offset, value);
                state.start_dsp_dma();
            }
            regs::WRT_DSP_DMAC11 if value == DMAC11_STOP => {
                state.regs.insert(offset, value);
                state.internal_fifo.clear();
            }
            _ => {}
        }
        if offset != MCA_MEM_DATA && offset != regs::WRT_DSP_MMA {
            state.regs.insert(offset, value);
        }
    }

    fn dma_read(&self, source: Address, buffer: &mut [Word]) -> Result<()> {
        let mut state = self.state.lock();
        state.dma_log.push((source, buffer.len()));
        if let Some(reason) = state.dma_fault.take() {
            return Err(PixieError::dma_failure(reason));
        }
        match source {
            DSP_MEM_DMA | FIFO_MEM_DMA => {
                let fifo = if source == DSP_MEM_DMA {
                    &mut state.internal_fifo
                } else {
                    &mut state.external_fifo
                };
                if fifo.len() < buffer.len() {
                    return Err(PixieError::dma_failure(format!(
                        "DMA read: {source:#x}: {} of {} words available",
                        fifo.len(),
                        buffer.len()
                    )));
                }
                let n = buffer.len();
                for (word, value) in buffer.iter_mut().zip(fifo.drain(..n)) {
                    *word = value;
                }
                Ok(())
            }
            MCA_MEM_DATA => {
                let start = state.mca_ptr;
                for (word, addr) in buffer.iter_mut().zip(start..) {
                    *word = state.mca.get(addr).copied().unwrap_or(0);
                }
                state.mca_ptr = start + buffer.len();
                Ok(())
            }
            _ => Err(PixieError::dma_failure(format!(
                "DMA read: no memory at {source:#x}"
            ))),
        }
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Simulated
    }
}
