//! The crate: modules by physical slot and the shared backplane
//!
//! Devices are opened in bus order and then moved to the table entry of the
//! slot they report. Logical module numbers follow slot order. The crate's
//! reentrant lock serialises structural calls; module work runs under each
//! module's own locks so modules boot in parallel.

use crate::backend::{select_backend, BackendSelection, BusBackend};
use crate::backends::SimBackend;
use crate::backplane::Backplane;
use crate::config::{BootParams, DmaConfig, RunTiming};
use crate::error::{PixieError, Result};
use crate::firmware::{FirmwareRegistry, FirmwareSet, FirmwareTag};
use crate::module::{ChannelConfig, Module, OpenedDevice};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use pixie16_chip::hw::{Slot, MAX_SLOTS};
use pixie16_chip::pcie::{PLX_9054_DEVICE_ID, PLX_VENDOR_ID};
use pixie16_chip::regs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Opens the crate's bus devices
pub trait DeviceProvider: Send + Sync {
    /// Open bus device `device_number`
    ///
    /// `Ok(None)` means there is no such device; the crate stops scanning.
    ///
    /// # Errors
    ///
    /// Returns error if the device exists but cannot be opened.
    fn open(&self, device_number: usize) -> Result<Option<OpenedDevice>>;
}

/// Identity and ADC layout of a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDef {
    /// Physical slot
    pub slot: Slot,
    /// Board revision
    pub revision: u8,
    /// Serial number
    pub serial: u32,
    /// Crate revision
    pub crate_revision: u8,
    /// Number of channels
    pub num_channels: usize,
    /// ADC resolution in bits
    pub adc_bits: u32,
    /// ADC sample rate in MSPS
    pub adc_msps: u32,
    /// ADC clock divider
    pub adc_clk_div: u32,
    /// The FPGAs are loaded when the module is opened (simulation only)
    pub loaded: bool,
}

impl Default for ModuleDef {
    fn default() -> Self {
        Self {
            slot: 2,
            revision: 15,
            serial: 0,
            crate_revision: 2,
            num_channels: 16,
            adc_bits: 16,
            adc_msps: 250,
            adc_clk_div: 2,
            loaded: true,
        }
    }
}

impl ModuleDef {
    /// A default module in `slot`
    pub fn at_slot(slot: Slot) -> Self {
        Self {
            slot,
            ..Self::default()
        }
    }

    /// Open with the FPGAs unloaded
    #[must_use]
    pub const fn unloaded(mut self) -> Self {
        self.loaded = false;
        self
    }

    /// Set the serial number
    #[must_use]
    pub const fn with_serial(mut self, serial: u32) -> Self {
        self.serial = serial;
        self
    }

    /// Set the ADC
    #[must_use]
    pub const fn with_adc(mut self, adc_bits: u32, adc_msps: u32, adc_clk_div: u32) -> Self {
        self.adc_bits = adc_bits;
        self.adc_msps = adc_msps;
        self.adc_clk_div = adc_clk_div;
        self
    }

    /// Channel configurations
    pub fn channels(&self) -> Vec<ChannelConfig> {
        (0..self.num_channels)
            .map(|chan| {
                let index = i32::try_from(chan).unwrap_or(-1);
                ChannelConfig::new(index, self.adc_bits, self.adc_msps, self.adc_clk_div)
            })
            .collect()
    }

    /// The tag of the firmware this module needs
    pub const fn firmware_tag(&self) -> FirmwareTag {
        FirmwareTag::new(self.revision, self.adc_msps, self.adc_bits)
    }

    fn device(&self, device_number: usize, slot: Slot, backend: Box<dyn BusBackend>) -> OpenedDevice {
        OpenedDevice {
            device_number,
            slot,
            revision: self.revision,
            serial: self.serial,
            crate_revision: self.crate_revision,
            channels: self.channels(),
            backend,
        }
    }
}

/// Simulated modules
#[derive(Debug, Clone)]
pub struct SimDeviceProvider {
    modules: Vec<(ModuleDef, SimBackend)>,
}

impl SimDeviceProvider {
    /// One simulated device per definition, in bus order
    pub fn new(defs: impl IntoIterator<Item = ModuleDef>) -> Self {
        let modules = defs
            .into_iter()
            .map(|def| {
                let sim = SimBackend::new();
                if !def.loaded {
                    sim.set_register(regs::CFG_RDCS, 0);
                }
                (def, sim)
            })
            .collect();
        Self { modules }
    }

    /// The simulator behind a device
    pub fn backend(&self, device_number: usize) -> Option<&SimBackend> {
        self.modules.get(device_number).map(|(_, sim)| sim)
    }
}

impl DeviceProvider for SimDeviceProvider {
    fn open(&self, device_number: usize) -> Result<Option<OpenedDevice>> {
        Ok(self.modules.get(device_number).map(|(def, sim)| {
            def.device(device_number, def.slot, Box::new(sim.clone()))
        }))
    }
}

/// Modules behind PLX 9054 bridges on the PCI bus
///
/// The board EEPROM is not read, so every module takes the template's ADC
/// layout and the slots are assigned in bus order from the template's slot.
#[derive(Debug, Clone)]
pub struct HardwareDeviceProvider {
    addresses: Vec<String>,
    template: ModuleDef,
    selection: BackendSelection,
}

impl HardwareDeviceProvider {
    /// Scan the PCI bus
    pub fn new(template: ModuleDef) -> Self {
        Self::with_addresses(Self::scan(), template)
    }

    /// Use a known list of PCI addresses
    pub fn with_addresses(addresses: Vec<String>, template: ModuleDef) -> Self {
        Self {
            addresses,
            template,
            selection: BackendSelection::Hardware,
        }
    }

    /// Choose how backends are selected
    #[must_use]
    pub const fn with_selection(mut self, selection: BackendSelection) -> Self {
        self.selection = selection;
        self
    }

    /// PCI addresses found, in bus order
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Find the PLX 9054 bridges in `/sys/bus/pci/devices`
    pub fn scan() -> Vec<String> {
        let Ok(entries) = std::fs::read_dir("/sys/bus/pci/devices") else {
            debug!("crate: scan: no PCI sysfs");
            return Vec::new();
        };

        let mut found: Vec<String> = entries
            .flatten()
            .filter(|entry| {
                let path = entry.path();
                read_hex_sysfs(&path.join("vendor")) == Some(PLX_VENDOR_ID)
                    && read_hex_sysfs(&path.join("device")) == Some(PLX_9054_DEVICE_ID)
            })
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();

        found.sort();
        debug!("crate: scan: found={}", found.len());
        found
    }
}

fn read_hex_sysfs(path: &Path) -> Option<u16> {
    let content = std::fs::read_to_string(path).ok()?;
    u16::from_str_radix(content.trim().trim_start_matches("0x"), 16).ok()
}

impl DeviceProvider for HardwareDeviceProvider {
    fn open(&self, device_number: usize) -> Result<Option<OpenedDevice>> {
        let Some(addr) = self.addresses.get(device_number) else {
            return Ok(None);
        };
        let backend = select_backend(self.selection, addr)?;
        info!("crate: device {device_number}: pci={addr}");
        let slot = self.template.slot + device_number;
        Ok(Some(self.template.device(device_number, slot, backend)))
    }
}

/// Module totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    /// Modules found
    pub present: usize,
    /// Modules loaded and usable
    pub online: usize,
    /// Modules present but not online
    pub offline: usize,
}

impl Counts {
    /// Online and offline make up the present modules
    pub const fn valid(&self, num_slots: usize) -> bool {
        self.online + self.offline == self.present && self.present <= num_slots
    }
}

impl std::fmt::Display for Counts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "present: {} online: {} offline: {}",
            self.present, self.online, self.offline
        )
    }
}

/// A user of the crate; the crate is busy while any exist
#[derive(Debug)]
pub struct CrateUser<'a> {
    chassis: &'a Crate,
}

impl Drop for CrateUser<'_> {
    fn drop(&mut self) {
        self.chassis.users.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A crate of modules
#[derive(Debug)]
pub struct Crate {
    lock: ReentrantMutex<()>,
    slots: RwLock<Vec<Arc<Module>>>,
    backplane: Arc<Backplane>,
    firmware: RwLock<FirmwareRegistry>,
    assigned: RwLock<BTreeMap<Slot, Arc<FirmwareSet>>>,
    counts: Mutex<Counts>,
    revision: Mutex<Option<u8>>,
    ready: AtomicBool,
    users: AtomicUsize,
    dma: DmaConfig,
    run_timing: RunTiming,
}

impl Default for Crate {
    fn default() -> Self {
        Self::new()
    }
}

impl Crate {
    /// An empty crate
    pub fn new() -> Self {
        Self {
            lock: ReentrantMutex::new(()),
            slots: RwLock::new(Vec::new()),
            backplane: Arc::new(Backplane::new()),
            firmware: RwLock::new(FirmwareRegistry::new()),
            assigned: RwLock::new(BTreeMap::new()),
            counts: Mutex::new(Counts::default()),
            revision: Mutex::new(None),
            ready: AtomicBool::new(false),
            users: AtomicUsize::new(0),
            dma: DmaConfig::default(),
            run_timing: RunTiming::default(),
        }
    }

    /// Block transfer configuration for modules opened later
    #[must_use]
    pub fn with_dma_config(mut self, dma: DmaConfig) -> Self {
        self.dma = dma;
        self
    }

    /// Run control timing for modules opened later
    #[must_use]
    pub fn with_run_timing(mut self, timing: RunTiming) -> Self {
        self.run_timing = timing;
        self
    }

    // ── State ────────────────────────────────────────────────────────────

    /// The crate is initialised
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn ready_check(&self) -> Result<()> {
        if self.ready() {
            Ok(())
        } else {
            Err(PixieError::CrateNotReady)
        }
    }

    /// Register a user
    pub fn user(&self) -> CrateUser<'_> {
        self.users.fetch_add(1, Ordering::AcqRel);
        CrateUser { chassis: self }
    }

    /// Users registered
    pub fn users(&self) -> usize {
        self.users.load(Ordering::Acquire)
    }

    /// Any users registered?
    pub fn busy(&self) -> bool {
        self.users() > 0
    }

    /// Module totals
    pub fn counts(&self) -> Counts {
        *self.counts.lock()
    }

    /// Slots in the table
    pub fn num_slots(&self) -> usize {
        self.slots.read().len()
    }

    /// Crate revision reported by the first module
    pub fn revision(&self) -> Option<u8> {
        *self.revision.lock()
    }

    /// The backplane
    pub fn backplane(&self) -> &Arc<Backplane> {
        &self.backplane
    }

    /// Module in a physical slot
    ///
    /// # Errors
    ///
    /// `ModuleNumberInvalid` for a slot outside the table.
    pub fn module(&self, slot: Slot) -> Result<Arc<Module>> {
        let slots = self.slots.read();
        slots
            .get(slot)
            .cloned()
            .ok_or_else(|| PixieError::ModuleNumberInvalid {
                index: slot,
                count: slots.len(),
            })
    }

    /// Module with a logical number
    ///
    /// # Errors
    ///
    /// `ModuleNumberInvalid` if no present module has the number.
    pub fn module_by_number(&self, number: usize) -> Result<Arc<Module>> {
        let slots = self.slots.read();
        slots
            .iter()
            .find(|m| m.present() && m.number() == number)
            .cloned()
            .ok_or_else(|| PixieError::ModuleNumberInvalid {
                index: number,
                count: slots.iter().filter(|m| m.present()).count(),
            })
    }

    /// Present modules in slot order
    pub fn modules(&self) -> Vec<Arc<Module>> {
        self.slots
            .read()
            .iter()
            .filter(|m| m.present())
            .cloned()
            .collect()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Open the crate's modules
    ///
    /// # Errors
    ///
    /// `CrateAlreadyOpen` if the crate is initialised. Devices that fail
    /// to open are logged and skipped.
    pub fn initialize(&self, provider: &dyn DeviceProvider) -> Result<()> {
        info!("crate: initialise");

        if self.ready.swap(true, Ordering::AcqRel) {
            return Err(PixieError::CrateAlreadyOpen);
        }

        let _lock = self.lock.lock();
        let result = self.open_modules(provider);
        if result.is_err() {
            self.ready.store(false, Ordering::Release);
        }
        result
    }

    fn open_modules(&self, provider: &dyn DeviceProvider) -> Result<()> {
        let mut found = Vec::new();
        for device_number in 0..MAX_SLOTS {
            let device = match provider.open(device_number) {
                Ok(Some(device)) => device,
                Ok(None) => break,
                Err(e) => {
                    error!("crate: device {device_number}: error: {e}");
                    continue;
                }
            };
            match Module::open(device, Arc::clone(&self.backplane)) {
                Ok(module) => found.push(
                    module
                        .with_dma_config(self.dma)
                        .with_run_timing(self.run_timing),
                ),
                Err(e) => error!("crate: device {device_number}: error: {e}"),
            }
        }

        let mut table: Vec<Option<Module>> = (0..MAX_SLOTS).map(|_| None).collect();
        for module in found {
            let slot = module.slot();
            if table[slot].is_some() {
                error!(
                    "crate: duplicate slot: {slot} device-number={}",
                    module.device_number()
                );
                module.close();
                continue;
            }
            table[slot] = Some(module);
        }

        let mut revision = None;
        for module in table.iter().flatten() {
            match revision {
                None => {
                    revision = Some(module.crate_revision());
                    info!("crate: crate revision: {}", module.crate_revision());
                }
                Some(rev) if rev != module.crate_revision() => warn!(
                    "crate: crate revision mismatch: {} module slot={}",
                    module.crate_revision(),
                    module.slot()
                ),
                Some(_) => {}
            }
        }

        let mut counts = Counts::default();
        for (number, module) in table.iter().flatten().enumerate() {
            module.set_number(number);
            counts.present += 1;
            if module.online() {
                info!(
                    "crate: slot {}: device-number={} serial-num={} online",
                    module.slot(),
                    module.device_number(),
                    module.serial()
                );
                counts.online += 1;
            } else {
                info!(
                    "crate: slot {}: device-number={} offline",
                    module.slot(),
                    module.device_number()
                );
                counts.offline += 1;
            }
        }

        let slots: Vec<Arc<Module>> = table
            .into_iter()
            .enumerate()
            .map(|(slot, module)| {
                Arc::new(module.unwrap_or_else(|| Module::vacant(slot, Arc::clone(&self.backplane))))
            })
            .collect();

        self.backplane.init(MAX_SLOTS, counts.present);
        *self.slots.write() = slots;
        *self.counts.lock() = counts;
        *self.revision.lock() = revision;
        info!("crate: {counts}");
        Ok(())
    }

    /// Close every module
    ///
    /// # Errors
    ///
    /// `ModuleTotalInvalid` if the totals do not balance once every module
    /// is closed.
    pub fn shutdown(&self) -> Result<()> {
        info!("crate: shutdown");
        let _lock = self.lock.lock();
        let slots = std::mem::take(&mut *self.slots.write());
        self.assigned.write().clear();

        let mut counts = self.counts.lock();
        for module in slots.iter().filter(|m| m.present()) {
            let was_online = module.online();
            module.close();
            if was_online {
                counts.online = counts.online.saturating_sub(1);
                counts.offline += 1;
            }
        }
        self.ready.store(false, Ordering::Release);

        if counts.online > 0 {
            return Err(PixieError::ModuleTotalInvalid {
                reason: "crate shutdown online count not 0".to_string(),
            });
        }
        if counts.offline != counts.present {
            return Err(PixieError::ModuleTotalInvalid {
                reason: "crate shutdown offline count not present count".to_string(),
            });
        }
        *counts = Counts::default();
        Ok(())
    }

    /// Bring an offline module online
    ///
    /// # Errors
    ///
    /// `ModuleNotFound` if the module is not present or is already online,
    /// `ModuleOffline` if its FPGAs are not loaded.
    pub fn set_online(&self, slot: Slot) -> Result<()> {
        let _lock = self.lock.lock();
        let module = self.module(slot)?;
        if !module.present() || module.online() {
            return Err(module.error(PixieError::not_found("module not seen as offline")));
        }
        info!("crate: set online: slot={slot}");
        module.force_online()?;
        let mut counts = self.counts.lock();
        counts.online += 1;
        counts.offline = counts.offline.saturating_sub(1);
        Ok(())
    }

    /// Take an online module offline
    ///
    /// # Errors
    ///
    /// `ModuleNotFound` if the module is not online.
    pub fn set_offline(&self, slot: Slot) -> Result<()> {
        let _lock = self.lock.lock();
        let module = self.module(slot)?;
        if !module.online() {
            return Err(module.error(PixieError::not_found("module not seen as online")));
        }
        info!("crate: set offline: slot={slot}");
        module.force_offline();
        let mut counts = self.counts.lock();
        counts.online = counts.online.saturating_sub(1);
        counts.offline += 1;
        Ok(())
    }

    /// Recount the modules from their FPGA state
    ///
    /// Returns `true` if every present module is online.
    ///
    /// # Errors
    ///
    /// `CrateNotReady` before initialisation, or a module probe error.
    pub fn probe(&self) -> Result<bool> {
        self.ready_check()?;
        let _lock = self.lock.lock();
        let slots = self.slots.read().clone();
        info!("crate: probe: {}", slots.len());

        let mut counts = Counts::default();
        for module in slots.iter().filter(|m| m.present()) {
            counts.present += 1;
            if module.opened() {
                module.probe()?;
                if module.online() {
                    counts.online += 1;
                } else {
                    counts.offline += 1;
                }
            }
        }
        *self.counts.lock() = counts;

        self.backplane_reinit()?;
        Ok(counts.online == counts.present)
    }

    /// Boot modules in parallel
    ///
    /// Every selected module is booted on its own thread. The first error
    /// is returned once all have finished; the backplane is re-initialised
    /// and the totals updated either way.
    ///
    /// # Errors
    ///
    /// - `ModuleNumberInvalid` for a slot outside the table
    /// - `CrateNotReady` before initialisation
    /// - the first module boot error
    pub fn boot(&self, params: &BootParams) -> Result<()> {
        info!(
            "crate: boot: force={} comms={} fippi={}",
            params.force, params.boot_comms, params.boot_fippi
        );

        let _lock = self.lock.lock();
        self.ready_check()?;

        let slots = self.slots.read().clone();
        let num_slots = slots.len();
        if let Some(&slot) = params.slots.iter().find(|&&slot| slot >= num_slots) {
            return Err(PixieError::ModuleNumberInvalid {
                index: slot,
                count: num_slots,
            });
        }

        let before: Vec<bool> = slots.iter().map(|m| m.online()).collect();
        let assigned = self.assigned.read().clone();
        let selected: Vec<Slot> = if params.slots.is_empty() {
            (0..num_slots).collect()
        } else {
            params.slots.clone()
        };

        let mut first_error = None;
        std::thread::scope(|scope| {
            let handles: Vec<_> = selected
                .iter()
                .filter_map(|&slot| {
                    let module = slots.get(slot)?;
                    if !module.opened() || (!params.force && module.online()) {
                        return None;
                    }
                    let firmware = assigned.get(&slot).cloned();
                    Some((
                        slot,
                        scope.spawn(move || {
                            let firmware = firmware.ok_or_else(|| {
                                module.error(PixieError::initialize_failure("no firmware set"))
                            })?;
                            module.boot(params, &firmware)
                        }),
                    ))
                })
                .collect();

            for (slot, handle) in handles {
                let result = handle.join().unwrap_or_else(|_| {
                    Err(PixieError::internal(format!("slot {slot}: boot thread panicked")))
                });
                if let Err(e) = result {
                    error!("crate: boot: {e}");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        });

        let reinit = self.backplane_reinit();

        {
            let mut counts = self.counts.lock();
            for (module, was_online) in slots.iter().zip(before) {
                if module.present() && module.online() != was_online {
                    if was_online {
                        counts.online = counts.online.saturating_sub(1);
                        counts.offline += 1;
                    } else {
                        counts.online += 1;
                        counts.offline = counts.offline.saturating_sub(1);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        reinit
    }

    /// Replay the modules' sync-wait state into the backplane
    ///
    /// # Errors
    ///
    /// `InternalFailure` if more modules wait than are present.
    pub fn backplane_reinit(&self) -> Result<()> {
        let present = self.counts.lock().present;
        let slots = self.slots.read();
        self.backplane
            .reinit(slots.iter().map(Arc::as_ref), present)
    }

    // ── Firmware ─────────────────────────────────────────────────────────

    /// Add a firmware set to the registry
    pub fn add_firmware(&self, set: FirmwareSet) {
        let _lock = self.lock.lock();
        self.firmware.write().add(set);
    }

    /// Assign each opened module the firmware set matching its tag
    ///
    /// # Errors
    ///
    /// `CrateNotReady` before initialisation.
    pub fn set_firmware(&self) -> Result<()> {
        info!("crate: set firmware");
        self.ready_check()?;
        let _lock = self.lock.lock();
        let registry = self.firmware.read();
        let mut assigned = self.assigned.write();
        assigned.clear();
        for module in self.slots.read().iter().filter(|m| m.opened()) {
            match FirmwareTag::of(module) {
                Some(tag) => match registry.get(&tag) {
                    Some(set) => {
                        debug!("{}crate: firmware: {tag}", module.label());
                        assigned.insert(module.slot(), set);
                    }
                    None => warn!("{}crate: module firmware not found: {tag}", module.label()),
                },
                None => warn!("{}no firmware set", module.label()),
            }
        }
        Ok(())
    }

    /// Firmware assigned to a slot
    pub fn firmware(&self, slot: Slot) -> Option<Arc<FirmwareSet>> {
        self.assigned.read().get(&slot).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoadTiming;
    use crate::firmware::FirmwareImage;
    use crate::ErrorCode;
    use pixie16_chip::hw::Word;

    fn provider(slots: &[Slot]) -> SimDeviceProvider {
        SimDeviceProvider::new(slots.iter().map(|&slot| ModuleDef::at_slot(slot)))
    }

    fn firmware() -> FirmwareSet {
        FirmwareSet::new(ModuleDef::default().firmware_tag())
            .with_image(FirmwareImage::new("sys", vec![1u8; 16]).unwrap())
            .with_image(FirmwareImage::new("fippi", vec![2u8; 16]).unwrap())
    }

    fn fast_boot() -> BootParams {
        BootParams::default().with_timing(LoadTiming::immediate(10))
    }

    #[test]
    fn modules_move_to_their_slots() {
        let chassis = Crate::new();
        chassis.initialize(&provider(&[5, 2, 9])).unwrap();
        assert!(chassis.ready());
        assert_eq!(chassis.num_slots(), MAX_SLOTS);
        assert_eq!(chassis.module(2).unwrap().number(), 0);
        assert_eq!(chassis.module(5).unwrap().number(), 1);
        assert_eq!(chassis.module(9).unwrap().number(), 2);
        assert_eq!(chassis.module(5).unwrap().device_number(), 0);
        assert!(!chassis.module(3).unwrap().present());
        assert_eq!(
            chassis.counts(),
            Counts {
                present: 3,
                online: 3,
                offline: 0
            }
        );
        assert_eq!(chassis.backplane().num_slots_present(), 3);
        assert_eq!(chassis.module_by_number(2).unwrap().slot(), 9);
        assert_eq!(chassis.revision(), Some(2));
    }

    #[test]
    fn second_initialize_fails() {
        let chassis = Crate::new();
        let devices = provider(&[2]);
        chassis.initialize(&devices).unwrap();
        let err = chassis.initialize(&devices).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CrateAlreadyOpen);
        assert!(chassis.ready());
    }

    #[test]
    fn duplicate_slot_is_dropped() {
        let chassis = Crate::new();
        chassis.initialize(&provider(&[4, 4])).unwrap();
        assert_eq!(chassis.counts().present, 1);
        assert_eq!(chassis.module(4).unwrap().device_number(), 0);
    }

    #[test]
    fn unloaded_module_is_offline_until_booted() {
        let devices = SimDeviceProvider::new([ModuleDef::at_slot(2), ModuleDef::at_slot(3).unloaded()]);
        let chassis = Crate::new();
        chassis.initialize(&devices).unwrap();
        assert_eq!(
            chassis.counts(),
            Counts {
                present: 2,
                online: 1,
                offline: 1
            }
        );
        assert!(!chassis.probe().unwrap());

        chassis.add_firmware(firmware());
        chassis.set_firmware().unwrap();
        assert!(chassis.firmware(3).is_some());

        let sim = devices.backend(1).unwrap();
        sim.set_register(regs::CFG_RDCS, Word::MAX);
        chassis.boot(&fast_boot().with_slots(vec![3])).unwrap();
        assert!(chassis.module(3).unwrap().online());
        assert_eq!(chassis.counts().online, 2);
        assert_eq!(sim.writes(regs::CFG_DATACS).len(), 4 + 4 + 4);
        assert!(chassis.probe().unwrap());
    }

    #[test]
    fn boot_without_firmware_fails_after_all_threads() {
        let chassis = Crate::new();
        chassis.initialize(&provider(&[2, 3])).unwrap();
        let err = chassis.boot(&fast_boot()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ModuleInitializeFailure);
        assert!(err.to_string().contains("no firmware set"));
        assert!(chassis.counts().valid(MAX_SLOTS));
    }

    #[test]
    fn unforced_boot_skips_online_modules() {
        let devices = provider(&[2]);
        let chassis = Crate::new();
        chassis.initialize(&devices).unwrap();
        chassis.boot(&fast_boot().unforced()).unwrap();
        assert!(devices.backend(0).unwrap().writes(regs::CFG_DATACS).is_empty());
    }

    #[test]
    fn boot_checks_slots_and_ready() {
        let chassis = Crate::new();
        let err = chassis.boot(&fast_boot()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CrateNotReady);

        chassis.initialize(&provider(&[2])).unwrap();
        let err = chassis.boot(&fast_boot().with_slots(vec![MAX_SLOTS])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ModuleNumberInvalid);
    }

    #[test]
    fn boot_racing_shutdown() {
        for _ in 0..20 {
            let chassis = Crate::new();
            chassis.initialize(&provider(&[2, 3])).unwrap();
            std::thread::scope(|scope| {
                let boot = scope.spawn(|| chassis.boot(&fast_boot().with_slots(vec![2, 3])));
                let shutdown = scope.spawn(|| chassis.shutdown());
                if let Err(e) = boot.join().unwrap() {
                    assert!(matches!(
                        e.code(),
                        ErrorCode::CrateNotReady | ErrorCode::ModuleInitializeFailure
                    ));
                }
                shutdown.join().unwrap().unwrap();
            });
            let err = chassis.boot(&fast_boot()).unwrap_err();
            assert_eq!(err.code(), ErrorCode::CrateNotReady);
        }
    }

    #[test]
    fn offline_and_online_keep_totals() {
        let chassis = Crate::new();
        chassis.initialize(&provider(&[2, 3])).unwrap();

        chassis.set_offline(3).unwrap();
        assert_eq!(chassis.counts().offline, 1);
        let err = chassis.set_offline(3).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ModuleNotFound);

        chassis.set_online(3).unwrap();
        assert_eq!(chassis.counts().online, 2);
        let err = chassis.set_online(3).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ModuleNotFound);

        let err = chassis.set_online(7).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ModuleNotFound);
        assert!(chassis.counts().valid(MAX_SLOTS));
    }

    #[test]
    fn shutdown_closes_everything() {
        let chassis = Crate::new();
        let devices = provider(&[2, 6]);
        chassis.initialize(&devices).unwrap();
        let module = chassis.module(6).unwrap();
        chassis.shutdown().unwrap();
        assert!(!chassis.ready());
        assert!(!module.opened());
        assert_eq!(chassis.counts(), Counts::default());

        chassis.initialize(&devices).unwrap();
        assert_eq!(chassis.counts().online, 2);
    }

    #[test]
    fn users_make_the_crate_busy() {
        let chassis = Crate::new();
        assert!(!chassis.busy());
        {
            let _a = chassis.user();
            let _b = chassis.user();
            assert_eq!(chassis.users(), 2);
            assert!(chassis.busy());
        }
        assert!(!chassis.busy());
    }

    #[test]
    fn probe_needs_ready() {
        let err = Crate::new().probe().unwrap_err();
        assert_eq!(err.code(), ErrorCode::CrateNotReady);
    }

    #[test]
    fn sync_wait_replayed_on_probe() {
        let chassis = Crate::new();
        chassis.initialize(&provider(&[2, 3])).unwrap();
        chassis.module(2).unwrap().set_sync_wait(true).unwrap();
        chassis.module(3).unwrap().set_sync_wait(true).unwrap();
        assert_eq!(chassis.backplane().sync_waits(), 2);
        assert!(chassis.probe().unwrap());
        assert_eq!(chassis.backplane().sync_waits(), 2);
    }

    #[test]
    fn missing_sysfs_device_is_not_present() {
        let hw = HardwareDeviceProvider::with_addresses(Vec::new(), ModuleDef::default());
        assert!(hw.open(0).unwrap().is_none());
    }
}
