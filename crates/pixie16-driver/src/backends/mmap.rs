//! Memory-mapped local bus window
//!
//! The PLX 9054 maps local address space 0 at PCI BAR 2. Mapping the sysfs
//! resource file gives direct access to the System FPGA registers and the
//! host bus windows behind it.

use crate::error::{PixieError, Result};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::ptr::NonNull;

/// Memory-mapped PCI BAR
///
/// Bounds-checked volatile 32-bit access. The region is unmapped on drop.
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<u8>,
    size: usize,
    _file: File,
    pcie_address: String,
    bar_index: usize,
}

impl MmapRegion {
    /// Map BAR `bar_index` of the PCI device at `pcie_address`
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The resource file does not exist or cannot be opened
    /// - The BAR is empty (device not enabled)
    /// - mmap fails
    pub fn new(pcie_address: &str, bar_index: usize) -> Result<Self> {
        let path = format!("/sys/bus/pci/devices/{pcie_address}/resource{bar_index}");

        tracing::debug!("Mapping PCI BAR: {path}");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                PixieError::initialize_failure(format!(
                    "cannot open {path}: {e}; is the device enabled?"
                ))
            })?;

        // BAR sizes fit in usize on the 64-bit hosts the crates run on
        #[allow(clippy::cast_possible_truncation)]
        let size = file
            .metadata()
            .map_err(|e| PixieError::initialize_failure(format!("cannot stat BAR: {e}")))?
            .len() as usize;

        if size == 0 {
            return Err(PixieError::initialize_failure(
                "BAR size is 0 (device not enabled?)",
            ));
        }

        // SAFETY: the file descriptor was just opened and is kept open in the
        // struct for the life of the mapping; size is non-zero; offset 0 is the
        // start of the BAR. The mapping is released in Drop.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
        }
        .map_err(|e| PixieError::initialize_failure(format!("mmap failed: {e}")))?;

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| PixieError::initialize_failure("mmap returned null"))?;

        tracing::info!(
            "Mapped BAR{bar_index} for {pcie_address} ({} MB at {ptr:p})",
            size / (1024 * 1024),
        );

        Ok(Self {
            ptr,
            size,
            _file: file,
            pcie_address: pcie_address.to_string(),
            bar_index,
        })
    }

    fn check(&self, offset: usize) -> Result<()> {
        if offset % 4 != 0 || offset + 4 > self.size {
            return Err(PixieError::internal(format!(
                "local bus access out of range: offset={offset:#x}, limit={:#x}",
                self.size
            )));
        }
        Ok(())
    }

    /// Read a 32-bit word at `offset`
    ///
    /// # Errors
    ///
    /// Returns error if the offset is unaligned or out of bounds
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        self.check(offset)?;

        // SAFETY: offset is aligned and offset + 4 <= size (checked above), so
        // the pointer is inside the live mapping. Volatile because the local
        // bus has side effects: FIFO ports pop a word per read.
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };

        Ok(value)
    }

    /// Write a 32-bit word at `offset`
    ///
    /// # Errors
    ///
    /// Returns error if the offset is unaligned or out of bounds
    pub fn write_u32(&self, offset: usize, value: u32) -> Result<()> {
        self.check(offset)?;

        // SAFETY: offset is aligned and offset + 4 <= size (checked above), so
        // the pointer is inside the live mapping.
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value);
        }

        Ok(())
    }

    /// Get region size
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Get PCI address
    #[must_use]
    pub fn pcie_address(&self) -> &str {
        &self.pcie_address
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        tracing::debug!(
            "Unmapping BAR{} for {} ({} MB)",
            self.bar_index,
            self.pcie_address,
            self.size / (1024 * 1024)
        );

        // SAFETY: ptr and size are exactly what mmap returned and was given in
        // new(); the mapping has not been released before.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: the region owns its mapping and the file keeping it alive; moving
// it between threads does not invalidate the mapping.
unsafe impl Send for MmapRegion {}

// SAFETY: all access is bounds-checked single-word volatile access. Callers
// serialise multi-word protocols with the module bus lock; concurrent single
// register accesses are handled by the bridge.
unsafe impl Sync for MmapRegion {}
