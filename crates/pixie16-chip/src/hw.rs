//! Module and crate limits.

/// Host bus address.
pub type Address = u32;

/// Basic unit of register and memory transfers.
pub type Word = u32;

/// Physical slot number.
pub type Slot = usize;

/// Maximum number of physical slots in a crate.
///
/// Some slots may not hold a module; those report not present.
pub const MAX_SLOTS: usize = 15;

/// Maximum number of channels a module can have.
pub const MAX_CHANNELS: usize = 32;

/// Largest single DMA burst, in words.
pub const MAX_DMA_BLOCK_SIZE: usize = 8192;

/// Block reads at or below this many words skip the DMA engine and are read
/// by polled I/O. The figure is inherited from the board's legacy host code.
pub const MIN_DMA_WORDS: usize = 48;

/// External FIFO size in words.
pub const FIFO_SIZE_WORDS: usize = 131_072;

/// Polls of the FIFO level before a watermark wait gives up.
pub const FIFO_WATERMARK_POLLS: usize = 1000;

/// Histogram length of the large (Rev F) histogram memory, in words.
pub const LARGE_HISTOGRAM_LENGTH: usize = 32768;

/// Histogram length of the small histogram memory, in words.
pub const SMALL_HISTOGRAM_LENGTH: usize = 16384;

/// Maximum ADC trace length, in words.
pub const MAX_ADC_TRACE_LENGTH: usize = 8192;

/// System FPGA clock frequency in MHz.
pub const SYSTEM_CLOCK_MHZ: usize = 100;

/// Hardware revision tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum RevTag {
    /// Revision A.
    RevA = 10,
    /// Revision B.
    RevB = 11,
    /// Revision C.
    RevC = 12,
    /// Revision D.
    RevD = 13,
    /// Revision E.
    RevE = 14,
    /// Revision F.
    RevF = 15,
    /// Revision G.
    RevG = 16,
    /// Revision H (AFE daughter boards).
    RevH = 17,
}

impl RevTag {
    /// Map a numeric revision to a tag.
    #[must_use]
    pub const fn from_revision(revision: u8) -> Option<Self> {
        match revision {
            10 => Some(Self::RevA),
            11 => Some(Self::RevB),
            12 => Some(Self::RevC),
            13 => Some(Self::RevD),
            14 => Some(Self::RevE),
            15 => Some(Self::RevF),
            16 => Some(Self::RevG),
            17 => Some(Self::RevH),
            _ => None,
        }
    }

    /// The revision letter, `'F'` for Rev F.
    #[must_use]
    pub const fn label(self) -> char {
        (self as u8 + 55) as char
    }
}
