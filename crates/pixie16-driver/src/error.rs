//! Error types for Pixie-16 driver operations

use thiserror::Error;

/// Result type alias for Pixie-16 operations
pub type Result<T> = std::result::Result<T, PixieError>;

/// Flat error code, independent of any module context attached to the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// DMA engine already active.
    DeviceDmaBusy,
    /// Platform DMA transfer failed.
    DeviceDmaFailure,
    /// FPGA clear/program/done exhausted its retries.
    DeviceLoadFailure,
    /// FIFO watermark never reached.
    DeviceFifoFailure,
    /// Empty or invalid firmware image.
    DeviceImageFailure,
    /// Host bus request misuse.
    DeviceHbrFailure,
    /// Run or control task did not end in time.
    ModuleTaskTimeout,
    /// Channel has no valid hardware index.
    ChannelInvalidIndex,
    /// Channel number out of range.
    ChannelNumberInvalid,
    /// Operation not valid in the current crate or module state.
    ModuleInvalidOperation,
    /// Invalid module parameter value.
    ModuleInvalidParam,
    /// Module is offline.
    ModuleOffline,
    /// Module not found or not in the expected state.
    ModuleNotFound,
    /// Module number or slot out of range.
    ModuleNumberInvalid,
    /// Module is already open.
    ModuleAlreadyOpen,
    /// Module failed to initialise.
    ModuleInitializeFailure,
    /// Module totals do not add up.
    ModuleTotalInvalid,
    /// Crate not initialised.
    CrateNotReady,
    /// Crate already initialised.
    CrateAlreadyOpen,
    /// Internal consistency failure.
    InternalFailure,
    /// Operating system I/O error.
    Io,
}

/// Errors that can occur during Pixie-16 operations
#[derive(Debug, Error)]
pub enum PixieError {
    /// DMA engine already active; not retried
    #[error("DMA busy: {reason}")]
    DeviceDmaBusy {
        /// Reason for failure
        reason: String,
    },

    /// Platform DMA transfer failed
    #[error("DMA failure: {reason}")]
    DeviceDmaFailure {
        /// Reason for failure
        reason: String,
    },

    /// FPGA load exhausted its retries
    #[error("FPGA load failure: {reason}")]
    DeviceLoadFailure {
        /// Reason for failure
        reason: String,
    },

    /// FIFO failed to reach the watermark
    #[error("FIFO failure: {reason}")]
    DeviceFifoFailure {
        /// Reason for failure
        reason: String,
    },

    /// Firmware image is empty or invalid
    #[error("image failure: {reason}")]
    DeviceImageFailure {
        /// Reason for failure
        reason: String,
    },

    /// Host bus request misuse
    #[error("host bus request failure: {reason}")]
    DeviceHbrFailure {
        /// Reason for failure
        reason: String,
    },

    /// Run control polling exhausted
    #[error("task timeout: {reason}")]
    ModuleTaskTimeout {
        /// Reason for failure
        reason: String,
    },

    /// Channel has no valid hardware index
    #[error("invalid channel index: {reason}")]
    ChannelInvalidIndex {
        /// Reason for failure
        reason: String,
    },

    /// Channel number out of range
    #[error("invalid channel number {channel} (have {count} channels)")]
    ChannelNumberInvalid {
        /// Requested channel
        channel: usize,
        /// Number of channels on the module
        count: usize,
    },

    /// Operation invalid in the current state
    #[error("invalid operation: {reason}")]
    ModuleInvalidOperation {
        /// Reason for failure
        reason: String,
    },

    /// Invalid module parameter value
    #[error("invalid parameter: {reason}")]
    ModuleInvalidParam {
        /// Reason for failure
        reason: String,
    },

    /// Module offline
    #[error("module offline: {reason}")]
    ModuleOffline {
        /// Reason for failure
        reason: String,
    },

    /// Module not found
    #[error("module not found: {reason}")]
    ModuleNotFound {
        /// Reason for failure
        reason: String,
    },

    /// Module number or slot out of range
    #[error("invalid module number or slot {index} (have {count})")]
    ModuleNumberInvalid {
        /// Requested number or slot
        index: usize,
        /// Valid range upper bound
        count: usize,
    },

    /// Module already open
    #[error("module already open: {reason}")]
    ModuleAlreadyOpen {
        /// Reason for failure
        reason: String,
    },

    /// Module initialisation failure
    #[error("module initialize failure: {reason}")]
    ModuleInitializeFailure {
        /// Reason for failure
        reason: String,
    },

    /// Module totals do not add up
    #[error("module totals invalid: {reason}")]
    ModuleTotalInvalid {
        /// Reason for failure
        reason: String,
    },

    /// Crate not ready
    #[error("crate is not ready")]
    CrateNotReady,

    /// Crate already initialised
    #[error("crate already initialised")]
    CrateAlreadyOpen,

    /// Internal consistency failure
    #[error("internal failure: {reason}")]
    InternalFailure {
        /// Reason for failure
        reason: String,
    },

    /// I/O error during device access
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Error raised by a module, qualified with its number and slot
    #[error("module {number} slot {slot}: {source}")]
    Module {
        /// Logical module number
        number: usize,
        /// Physical slot
        slot: usize,
        /// The module's error
        #[source]
        source: Box<PixieError>,
    },
}

impl PixieError {
    /// The error code, looking through any module context.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::DeviceDmaBusy { .. } => ErrorCode::DeviceDmaBusy,
            Self::DeviceDmaFailure { .. } => ErrorCode::DeviceDmaFailure,
            Self::DeviceLoadFailure { .. } => ErrorCode::DeviceLoadFailure,
            Self::DeviceFifoFailure { .. } => ErrorCode::DeviceFifoFailure,
            Self::DeviceImageFailure { .. } => ErrorCode::DeviceImageFailure,
            Self::DeviceHbrFailure { .. } => ErrorCode::DeviceHbrFailure,
            Self::ModuleTaskTimeout { .. } => ErrorCode::ModuleTaskTimeout,
            Self::ChannelInvalidIndex { .. } => ErrorCode::ChannelInvalidIndex,
            Self::ChannelNumberInvalid { .. } => ErrorCode::ChannelNumberInvalid,
            Self::ModuleInvalidOperation { .. } => ErrorCode::ModuleInvalidOperation,
            Self::ModuleInvalidParam { .. } => ErrorCode::ModuleInvalidParam,
            Self::ModuleOffline { .. } => ErrorCode::ModuleOffline,
            Self::ModuleNotFound { .. } => ErrorCode::ModuleNotFound,
            Self::ModuleNumberInvalid { .. } => ErrorCode::ModuleNumberInvalid,
            Self::ModuleAlreadyOpen { .. } => ErrorCode::ModuleAlreadyOpen,
            Self::ModuleInitializeFailure { .. } => ErrorCode::ModuleInitializeFailure,
            Self::ModuleTotalInvalid { .. } => ErrorCode::ModuleTotalInvalid,
            Self::CrateNotReady => ErrorCode::CrateNotReady,
            Self::CrateAlreadyOpen => ErrorCode::CrateAlreadyOpen,
            Self::InternalFailure { .. } => ErrorCode::InternalFailure,
            Self::Io { .. } => ErrorCode::Io,
            Self::Module { source, .. } => source.code(),
        }
    }

    /// Attach module context. Errors that already carry it are left as is.
    #[must_use]
    pub fn in_module(self, number: usize, slot: usize) -> Self {
        match self {
            Self::Module { .. } => self,
            other => Self::Module {
                number,
                slot,
                source: Box::new(other),
            },
        }
    }

    /// Create a DMA busy error
    pub fn dma_busy(reason: impl Into<String>) -> Self {
        Self::DeviceDmaBusy {
            reason: reason.into(),
        }
    }

    /// Create a DMA failure error
    pub fn dma_failure(reason: impl Into<String>) -> Self {
        Self::DeviceDmaFailure {
            reason: reason.into(),
        }
    }

    /// Create an FPGA load failure error
    pub fn load_failure(reason: impl Into<String>) -> Self {
        Self::DeviceLoadFailure {
            reason: reason.into(),
        }
    }

    /// Create a FIFO failure error
    pub fn fifo_failure(reason: impl Into<String>) -> Self {
        Self::DeviceFifoFailure {
            reason: reason.into(),
        }
    }

    /// Create an image failure error
    pub fn image_failure(reason: impl Into<String>) -> Self {
        Self::DeviceImageFailure {
            reason: reason.into(),
        }
    }

    /// Create a task timeout error
    pub fn task_timeout(reason: impl Into<String>) -> Self {
        Self::ModuleTaskTimeout {
            reason: reason.into(),
        }
    }

    /// Create an invalid channel index error
    pub fn channel_invalid_index(reason: impl Into<String>) -> Self {
        Self::ChannelInvalidIndex {
            reason: reason.into(),
        }
    }

    /// Create an invalid operation error
    pub fn invalid_operation(reason: impl Into<String>) -> Self {
        Self::ModuleInvalidOperation {
            reason: reason.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_param(reason: impl Into<String>) -> Self {
        Self::ModuleInvalidParam {
            reason: reason.into(),
        }
    }

    /// Create a module offline error
    pub fn offline(reason: impl Into<String>) -> Self {
        Self::ModuleOffline {
            reason: reason.into(),
        }
    }

    /// Create a module not found error
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::ModuleNotFound {
            reason: reason.into(),
        }
    }

    /// Create a module initialise failure error
    pub fn initialize_failure(reason: impl Into<String>) -> Self {
        Self::ModuleInitializeFailure {
            reason: reason.into(),
        }
    }

    /// Create an internal failure error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::InternalFailure {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_looks_through_module_context() {
        let err = PixieError::load_failure("fpga-sys programming failure").in_module(3, 5);
        assert_eq!(err.code(), ErrorCode::DeviceLoadFailure);
        assert_eq!(
            err.to_string(),
            "module 3 slot 5: FPGA load failure: fpga-sys programming failure"
        );
    }

    #[test]
    fn context_is_attached_once() {
        let err = PixieError::dma_busy("dsp").in_module(0, 2).in_module(1, 3);
        assert!(matches!(err, PixieError::Module { slot: 2, .. }));
    }
}
