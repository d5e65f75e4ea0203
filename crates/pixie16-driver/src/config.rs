//! Protocol tuning and boot configuration
//!
//! The defaults are the values the modules are known to work with. Tests
//! shrink the timings so failure paths finish quickly.

use pixie16_chip::hw::{FIFO_WATERMARK_POLLS, MAX_DMA_BLOCK_SIZE, MIN_DMA_WORDS};
use serde::{Deserialize, Serialize};

/// Host bus block transfer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmaConfig {
    /// Largest single DMA burst in words
    pub max_block_words: usize,

    /// Remaining lengths at or below this are read by polled I/O
    pub min_dma_words: usize,

    /// FIFO level polls before a watermark wait fails
    pub fifo_polls: usize,
}

impl Default for DmaConfig {
    fn default() -> Self {
        Self {
            max_block_words: MAX_DMA_BLOCK_SIZE,
            min_dma_words: MIN_DMA_WORDS,
            fifo_polls: FIFO_WATERMARK_POLLS,
        }
    }
}

impl DmaConfig {
    /// Set the largest burst
    #[must_use]
    pub const fn with_max_block_words(mut self, words: usize) -> Self {
        self.max_block_words = words;
        self
    }

    /// Set the FIFO watermark poll budget
    #[must_use]
    pub const fn with_fifo_polls(mut self, polls: usize) -> Self {
        self.fifo_polls = polls;
        self
    }
}

/// FPGA clear and load timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadTiming {
    /// Polls of the status register waiting for the clear done bits
    pub clear_polls: usize,

    /// Period between clear polls (µs)
    pub clear_poll_us: u64,

    /// Polls of the status register waiting for the load done bits
    pub done_polls: usize,

    /// Period between done polls (µs)
    pub done_poll_us: u64,

    /// Backoff added after each failed attempt
    pub backoff_step: u32,

    /// Settle time between driving PROGB low and high (µs)
    pub settle_us: u64,

    /// Wait after the FiPPIs load before the DCM reset (µs)
    pub dcm_reset_us: u64,
}

impl Default for LoadTiming {
    fn default() -> Self {
        Self {
            clear_polls: 250,
            clear_poll_us: 100,
            done_polls: 250,
            done_poll_us: 1000,
            backoff_step: 2,
            settle_us: 100,
            dcm_reset_us: 10_000,
        }
    }
}

impl LoadTiming {
    /// Timing with no waits, for simulated modules
    #[must_use]
    pub const fn immediate(polls: usize) -> Self {
        Self {
            clear_polls: polls,
            clear_poll_us: 0,
            done_polls: polls,
            done_poll_us: 0,
            backoff_step: 2,
            settle_us: 0,
            dcm_reset_us: 0,
        }
    }

    /// Set both poll budgets
    #[must_use]
    pub const fn with_polls(mut self, clear: usize, done: usize) -> Self {
        self.clear_polls = clear;
        self.done_polls = done;
        self
    }
}

/// Run control timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTiming {
    /// Time allowed for the DSP to end a run (ms)
    pub end_wait_ms: u64,

    /// Period between active polls (µs)
    pub poll_us: u64,
}

impl Default for RunTiming {
    fn default() -> Self {
        Self {
            end_wait_ms: 1000,
            poll_us: 1000,
        }
    }
}

impl RunTiming {
    /// Number of polls the end wait allows
    pub const fn polls(&self) -> u64 {
        if self.poll_us == 0 {
            self.end_wait_ms
        } else {
            let polls = self.end_wait_ms * 1000 / self.poll_us;
            if polls == 0 {
                1
            } else {
                polls
            }
        }
    }

    /// Set the end wait
    #[must_use]
    pub const fn with_end_wait_ms(mut self, ms: u64) -> Self {
        self.end_wait_ms = ms;
        self
    }

    /// Set the poll period
    #[must_use]
    pub const fn with_poll_us(mut self, us: u64) -> Self {
        self.poll_us = us;
        self
    }
}

/// What to boot and where
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootParams {
    /// Boot modules that are already online
    pub force: bool,

    /// Load the communications FPGA
    pub boot_comms: bool,

    /// Load the FiPPI FPGAs
    pub boot_fippi: bool,

    /// Slots to boot; empty means every slot
    pub slots: Vec<usize>,

    /// FPGA load attempts
    pub retries: u32,

    /// FPGA timing
    pub timing: LoadTiming,
}

impl Default for BootParams {
    fn default() -> Self {
        Self {
            force: true,
            boot_comms: true,
            boot_fippi: true,
            slots: Vec::new(),
            retries: 10,
            timing: LoadTiming::default(),
        }
    }
}

impl BootParams {
    /// Boot only these slots
    #[must_use]
    pub fn with_slots(mut self, slots: impl Into<Vec<usize>>) -> Self {
        self.slots = slots.into();
        self
    }

    /// Set the FPGA retries
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the FPGA timing
    #[must_use]
    pub const fn with_timing(mut self, timing: LoadTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Do not boot modules that are online
    #[must_use]
    pub const fn unforced(mut self) -> Self {
        self.force = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dma_defaults() {
        let cfg = DmaConfig::default();
        assert_eq!(cfg.max_block_words, 8192);
        assert_eq!(cfg.min_dma_words, 48);
        assert_eq!(cfg.fifo_polls, 1000);
    }

    #[test]
    fn run_polls_cover_end_wait() {
        assert_eq!(RunTiming::default().polls(), 1000);
        assert_eq!(RunTiming::default().with_poll_us(0).polls(), 1000);
        assert_eq!(RunTiming::default().with_end_wait_ms(0).polls(), 1);
    }

    #[test]
    fn boot_defaults_boot_everything() {
        let params = BootParams::default();
        assert!(params.force && params.boot_comms && params.boot_fippi);
        assert!(params.slots.is_empty());
    }
}
