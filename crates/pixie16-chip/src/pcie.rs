//! PCI identifiers of the PLX 9054 bridge on the Pixie-16.

/// PLX Technology vendor ID.
pub const PLX_VENDOR_ID: u16 = 0x10B5;

/// PCI 9054 bridge device ID.
pub const PLX_9054_DEVICE_ID: u16 = 0x9054;

/// BAR that maps the local bus: System FPGA registers and host bus windows.
pub const LOCAL_BUS_BAR: usize = 2;

/// Size of the mapped local bus address space.
pub const ADDR_SPACE_SIZE: usize = 0x0080_0000;

/// Format a `vendor:device` string for use with `lspci -d`.
#[must_use]
pub fn lspci_filter() -> String {
    format!("{PLX_VENDOR_ID:04x}:{PLX_9054_DEVICE_ID:04x}")
}
