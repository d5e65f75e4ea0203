//! Firmware images
//!
//! Firmware is matched to a module by a tag made from the board revision and
//! the ADC sample rate and resolution. A [`FirmwareSet`] holds the images
//! for one tag, keyed by device name (`sys`, `fippi`, `dsp`, `var`). The
//! crate keeps the sets in a [`FirmwareRegistry`].

use crate::error::{PixieError, Result};
use crate::module::Module;
use bytes::{Buf, Bytes};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Device names an image can be for
pub const DEVICES: [&str; 4] = ["sys", "fippi", "dsp", "var"];

/// Board revision, ADC sample rate and ADC resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FirmwareTag {
    /// Board revision
    pub revision: u8,
    /// ADC sample rate in MSPS
    pub adc_msps: u32,
    /// ADC resolution in bits
    pub adc_bits: u32,
}

impl FirmwareTag {
    /// Create a tag
    pub const fn new(revision: u8, adc_msps: u32, adc_bits: u32) -> Self {
        Self {
            revision,
            adc_msps,
            adc_bits,
        }
    }

    /// Tag of a module, from its first channel's ADC
    pub fn of(module: &Module) -> Option<Self> {
        module
            .channels()
            .first()
            .map(|chan| Self::new(module.revision(), chan.adc_msps, chan.adc_bits))
    }
}

impl std::fmt::Display for FirmwareTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.revision, self.adc_msps, self.adc_bits)
    }
}

/// A firmware image for one device
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    device: String,
    data: Bytes,
}

impl FirmwareImage {
    /// Create an image
    ///
    /// # Errors
    ///
    /// `DeviceImageFailure` for an unknown device name.
    pub fn new(device: impl Into<String>, data: impl Into<Bytes>) -> Result<Self> {
        let device = device.into();
        if !DEVICES.contains(&device.as_str()) {
            return Err(PixieError::image_failure(format!(
                "firmware: invalid device: {device}"
            )));
        }
        Ok(Self {
            device,
            data: data.into(),
        })
    }

    /// Read an image from a file
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, `DeviceImageFailure` for an unknown
    /// device name.
    pub fn from_file(device: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        debug!("firmware: load: file={} size={}", path.display(), data.len());
        Self::new(device, data)
    }

    /// Device the image is for
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Image data
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// The image has no data
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of whole 32-bit words
    pub fn word_count(&self) -> usize {
        self.data.len() / 4
    }

    /// The image as little-endian 32-bit words
    ///
    /// Only whole words are yielded; trailing bytes are not loaded.
    pub fn words(&self) -> impl Iterator<Item = u32> + '_ {
        let mut data = self.data.slice(..self.word_count() * 4);
        std::iter::from_fn(move || (data.remaining() >= 4).then(|| data.get_u32_le()))
    }
}

/// The images for one firmware tag
#[derive(Debug, Clone)]
pub struct FirmwareSet {
    tag: FirmwareTag,
    images: BTreeMap<String, FirmwareImage>,
}

impl FirmwareSet {
    /// An empty set
    pub const fn new(tag: FirmwareTag) -> Self {
        Self {
            tag,
            images: BTreeMap::new(),
        }
    }

    /// Add an image, replacing any for the same device
    #[must_use]
    pub fn with_image(mut self, image: FirmwareImage) -> Self {
        self.add(image);
        self
    }

    /// Add an image, replacing any for the same device
    pub fn add(&mut self, image: FirmwareImage) {
        self.images.insert(image.device.clone(), image);
    }

    /// The set's tag
    pub const fn tag(&self) -> FirmwareTag {
        self.tag
    }

    /// Image for a device
    ///
    /// # Errors
    ///
    /// `DeviceImageFailure` if the set has no image for the device.
    pub fn image(&self, device: &str) -> Result<&FirmwareImage> {
        self.images.get(device).ok_or_else(|| {
            PixieError::image_failure(format!("firmware: {}: no image: {device}", self.tag))
        })
    }

    /// Devices with an image
    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.images.keys().map(String::as_str)
    }
}

/// Firmware sets by tag
#[derive(Debug, Clone, Default)]
pub struct FirmwareRegistry {
    sets: BTreeMap<FirmwareTag, Arc<FirmwareSet>>,
}

impl FirmwareRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a set, replacing any with the same tag
    pub fn add(&mut self, set: FirmwareSet) {
        debug!("firmware: add: tag={} devices={}", set.tag, set.images.len());
        self.sets.insert(set.tag, Arc::new(set));
    }

    /// Set for a tag
    pub fn get(&self, tag: &FirmwareTag) -> Option<Arc<FirmwareSet>> {
        self.sets.get(tag).cloned()
    }

    /// Tags held
    pub fn tags(&self) -> impl Iterator<Item = &FirmwareTag> {
        self.sets.keys()
    }

    /// Number of sets
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// The registry has no sets
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
