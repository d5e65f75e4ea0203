//! A Pixie-16 module in a crate slot
//!
//! The module owns its bus backend and two locks:
//!
//! - the module lock (reentrant) serialises lifecycle and run control calls
//! - the bus lock (not reentrant) serialises multi-register bus protocols
//!
//! Protocol functions that must run under the bus lock take the held
//! [`BusGuard`], so calling them without the lock does not compile.

use crate::backend::{BackendType, BusBackend};
use crate::backplane::{Backplane, BackplaneMember, Role};
use crate::config::{BootParams, DmaConfig, RunTiming};
use crate::error::{PixieError, Result};
use crate::firmware::FirmwareSet;
use crate::run::{self, ControlTask, RunMode, RunTask};
use crate::{csr, fpga};
use parking_lot::{Mutex as StateMutex, ReentrantMutex, ReentrantMutexGuard};
use pixie16_chip::hw::{Address, RevTag, Slot, Word, MAX_CHANNELS, MAX_SLOTS};
use pixie16_chip::regs::{self, cpld, csr::mask, modcsrb};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Hardware configuration of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Index of the channel in the module's DSP memory; negative when the
    /// channel has no hardware behind it
    pub index: i32,
    /// ADC resolution in bits
    pub adc_bits: u32,
    /// ADC sample rate in MSPS
    pub adc_msps: u32,
    /// ADC clock divider
    pub adc_clk_div: u32,
    /// FPGA clock in MHz
    pub fpga_clk_mhz: u32,
}

impl ChannelConfig {
    /// Create a channel; the FPGA clock is the ADC rate over the divider
    pub const fn new(index: i32, adc_bits: u32, adc_msps: u32, adc_clk_div: u32) -> Self {
        let fpga_clk_mhz = if adc_clk_div == 0 {
            adc_msps
        } else {
            adc_msps / adc_clk_div
        };
        Self {
            index,
            adc_bits,
            adc_msps,
            adc_clk_div,
            fpga_clk_mhz,
        }
    }
}

/// A device a [`DeviceProvider`](crate::DeviceProvider) has opened
#[derive(Debug)]
pub struct OpenedDevice {
    /// Bus device number
    pub device_number: usize,
    /// Physical slot
    pub slot: Slot,
    /// Board revision
    pub revision: u8,
    /// Serial number
    pub serial: u32,
    /// Crate revision read from the backplane
    pub crate_revision: u8,
    /// Channel configuration
    pub channels: Vec<ChannelConfig>,
    /// Local bus
    pub backend: Box<dyn BusBackend>,
}

/// The module's bus lock, held
#[derive(Debug)]
pub struct BusGuard<'a> {
    module: &'a Module,
    _lock: MutexGuard<'a, ()>,
}

impl<'a> BusGuard<'a> {
    /// The module the lock belongs to
    pub const fn module(&self) -> &'a Module {
        self.module
    }
}

#[derive(Debug, Clone, Copy)]
struct Tasks {
    run: RunTask,
    control: ControlTask,
}

/// A module
#[derive(Debug)]
pub struct Module {
    number: AtomicUsize,
    slot: Slot,
    device_number: usize,
    revision: u8,
    serial: u32,
    crate_revision: u8,
    channels: Vec<ChannelConfig>,
    backend: Option<Box<dyn BusBackend>>,
    backplane: Arc<Backplane>,

    present: bool,
    opened: AtomicBool,
    online: AtomicBool,
    forced_offline: AtomicBool,
    comms_fpga: AtomicBool,
    fippi_fpga: AtomicBool,
    sync_wait: AtomicBool,
    cfg_ctrlcs: AtomicU32,
    tasks: StateMutex<Tasks>,

    dma: DmaConfig,
    run_timing: RunTiming,

    lock: ReentrantMutex<()>,
    bus_lock: Mutex<()>,
}

impl Module {
    /// An empty slot
    pub fn vacant(slot: Slot, backplane: Arc<Backplane>) -> Self {
        Self {
            number: AtomicUsize::new(slot),
            slot,
            device_number: usize::MAX,
            revision: 0,
            serial: 0,
            crate_revision: 0,
            channels: Vec::new(),
            backend: None,
            backplane,
            present: false,
            opened: AtomicBool::new(false),
            online: AtomicBool::new(false),
            forced_offline: AtomicBool::new(false),
            comms_fpga: AtomicBool::new(false),
            fippi_fpga: AtomicBool::new(false),
            sync_wait: AtomicBool::new(false),
            cfg_ctrlcs: AtomicU32::new(0),
            tasks: StateMutex::new(Tasks {
                run: RunTask::Nop,
                control: ControlTask::Nop,
            }),
            dma: DmaConfig::default(),
            run_timing: RunTiming::default(),
            lock: ReentrantMutex::new(()),
            bus_lock: Mutex::new(()),
        }
    }

    /// Open a module on a device
    ///
    /// The module is online if the FPGAs are already loaded.
    ///
    /// # Errors
    ///
    /// Returns error if the slot or channel count is out of range.
    pub fn open(device: OpenedDevice, backplane: Arc<Backplane>) -> Result<Self> {
        info!(
            "module: open: device-number={} slot={} serial-num={} revision={} backend={}",
            device.device_number,
            device.slot,
            device.serial,
            device.revision,
            device.backend.backend_type()
        );

        if device.slot >= MAX_SLOTS {
            return Err(PixieError::ModuleNumberInvalid {
                index: device.slot,
                count: MAX_SLOTS,
            });
        }
        if device.channels.is_empty() || device.channels.len() > MAX_CHANNELS {
            return Err(PixieError::initialize_failure(format!(
                "device {}: invalid channel count: {}",
                device.device_number,
                device.channels.len()
            ))
            .in_module(device.slot, device.slot));
        }

        let module = Self {
            device_number: device.device_number,
            revision: device.revision,
            serial: device.serial,
            crate_revision: device.crate_revision,
            channels: device.channels,
            backend: Some(device.backend),
            present: true,
            ..Self::vacant(device.slot, backplane)
        };
        module.opened.store(true, Ordering::Release);
        module.refresh_fpga_state();
        Ok(module)
    }

    /// Use a block transfer configuration
    #[must_use]
    pub fn with_dma_config(mut self, dma: DmaConfig) -> Self {
        self.dma = dma;
        self
    }

    /// Use a run control timing
    #[must_use]
    pub fn with_run_timing(mut self, timing: RunTiming) -> Self {
        self.run_timing = timing;
        self
    }

    // ── Identity ─────────────────────────────────────────────────────────

    /// Logical module number
    pub fn number(&self) -> usize {
        self.number.load(Ordering::Acquire)
    }

    pub(crate) fn set_number(&self, number: usize) {
        self.number.store(number, Ordering::Release);
    }

    /// Physical slot
    pub const fn slot(&self) -> Slot {
        self.slot
    }

    /// Bus device number
    pub const fn device_number(&self) -> usize {
        self.device_number
    }

    /// Board revision
    pub const fn revision(&self) -> u8 {
        self.revision
    }

    /// Board revision as a tag
    pub const fn rev_tag(&self) -> Option<RevTag> {
        RevTag::from_revision(self.revision)
    }

    /// Serial number
    pub const fn serial(&self) -> u32 {
        self.serial
    }

    /// Crate revision
    pub const fn crate_revision(&self) -> u8 {
        self.crate_revision
    }

    /// Number of channels
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Channel configurations
    pub fn channels(&self) -> &[ChannelConfig] {
        &self.channels
    }

    /// Backend type, if a device is present
    pub fn backend_type(&self) -> Option<BackendType> {
        self.backend.as_ref().map(|b| b.backend_type())
    }

    /// The crate's backplane
    pub fn backplane(&self) -> &Backplane {
        &self.backplane
    }

    /// Block transfer configuration
    pub const fn dma_config(&self) -> &DmaConfig {
        &self.dma
    }

    /// Run control timing
    pub const fn run_timing(&self) -> &RunTiming {
        &self.run_timing
    }

    /// Log prefix
    pub fn label(&self) -> String {
        format!("module {} slot {}: ", self.number(), self.slot)
    }

    /// Attach this module's number and slot to an error
    pub fn error(&self, err: PixieError) -> PixieError {
        err.in_module(self.number(), self.slot)
    }

    // ── State ────────────────────────────────────────────────────────────

    /// A device was found for the slot
    pub const fn present(&self) -> bool {
        self.present
    }

    /// The module is open
    pub fn opened(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// The module is loaded and not forced offline
    pub fn online(&self) -> bool {
        self.online.load(Ordering::Acquire) && !self.forced_offline.load(Ordering::Acquire)
    }

    /// The module has been forced offline
    pub fn forced_offline(&self) -> bool {
        self.forced_offline.load(Ordering::Acquire)
    }

    /// The communications FPGA is loaded
    pub fn comms_loaded(&self) -> bool {
        self.comms_fpga.load(Ordering::Acquire)
    }

    /// The FiPPIs are loaded
    pub fn fippi_loaded(&self) -> bool {
        self.fippi_fpga.load(Ordering::Acquire)
    }

    /// The sync-wait state last requested
    pub fn sync_wait(&self) -> bool {
        self.sync_wait.load(Ordering::Acquire)
    }

    /// Current run task
    pub fn run_task(&self) -> RunTask {
        self.tasks.lock().run
    }

    /// Current control task
    pub fn control_task(&self) -> ControlTask {
        self.tasks.lock().control
    }

    pub(crate) fn set_tasks(&self, run: RunTask, control: ControlTask) {
        *self.tasks.lock() = Tasks { run, control };
    }

    /// Fail unless the module is online
    ///
    /// # Errors
    ///
    /// `ModuleOffline` when the module is offline.
    pub fn online_check(&self) -> Result<()> {
        if self.online() {
            Ok(())
        } else {
            Err(self.error(PixieError::offline("module offline")))
        }
    }

    /// Fail unless `channel` exists
    ///
    /// # Errors
    ///
    /// `ChannelNumberInvalid` when the channel is out of range.
    pub fn channel_check(&self, channel: usize) -> Result<()> {
        if channel < self.channels.len() {
            Ok(())
        } else {
            Err(self.error(PixieError::ChannelNumberInvalid {
                channel,
                count: self.channels.len(),
            }))
        }
    }

    /// DSP memory index of a channel
    ///
    /// # Errors
    ///
    /// `ChannelNumberInvalid` for a channel out of range and
    /// `ChannelInvalidIndex` for a channel with no hardware index.
    pub fn channel_index(&self, channel: usize) -> Result<Address> {
        self.channel_check(channel)?;
        let index = self.channels[channel].index;
        Address::try_from(index).map_err(|_| {
            PixieError::channel_invalid_index(format!(
                "dsp: invalid index: module={} channel={channel}",
                self.number()
            ))
        })
    }

    // ── Bus ──────────────────────────────────────────────────────────────

    /// Take the module lock
    pub(crate) fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Take the bus lock
    ///
    /// The lock is not reentrant: taking it twice on one thread deadlocks.
    ///
    /// # Errors
    ///
    /// `InternalFailure` if a thread panicked holding the lock.
    pub fn bus_guard(&self) -> Result<BusGuard<'_>> {
        let lock = self.bus_lock.lock().map_err(|_| {
            self.error(PixieError::internal("bus lock poisoned"))
        })?;
        Ok(BusGuard {
            module: self,
            _lock: lock,
        })
    }

    /// Read a register
    pub fn read_word(&self, offset: Address) -> Word {
        match &self.backend {
            Some(backend) => backend.read_word(offset),
            None => Word::MAX,
        }
    }

    /// Write a register
    pub fn write_word(&self, offset: Address, value: Word) {
        if let Some(backend) = &self.backend {
            backend.write_word(offset, value);
        }
    }

    /// DMA `buffer.len()` words from a local bus address
    ///
    /// # Errors
    ///
    /// - `ModuleOffline` if the module is offline
    /// - `DeviceDmaFailure` if `guard` is another module's or the transfer fails
    pub fn dma_read(&self, guard: &BusGuard<'_>, source: Address, buffer: &mut [Word]) -> Result<()> {
        debug!(
            "{}dma read: addr={source:#x} length={}",
            self.label(),
            buffer.len()
        );

        self.online_check()?;

        if !std::ptr::eq(guard.module, self) {
            return Err(self.error(PixieError::dma_failure("bus lock not held")));
        }

        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| self.error(PixieError::not_found("no device")))?;

        let start = Instant::now();
        backend
            .dma_read(source, buffer)
            .map_err(|e| self.error(e))?;

        debug!("{}dma read: done, period={:?}", self.label(), start.elapsed());
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    fn refresh_fpga_state(&self) {
        let comms = fpga::comms_done(self);
        let fippi = comms && fpga::fippi_done(self);
        self.comms_fpga.store(comms, Ordering::Release);
        self.fippi_fpga.store(fippi, Ordering::Release);
        self.online.store(comms && fippi, Ordering::Release);
    }

    /// Read the FPGA state and bring the module online if it is loaded
    ///
    /// # Errors
    ///
    /// `ModuleOffline` if the module is not open.
    pub fn probe(&self) -> Result<()> {
        let _lock = self.lock();
        if !self.opened() {
            return Err(self.error(PixieError::offline("module not open")));
        }
        self.refresh_fpga_state();
        info!(
            "{}probe: sys={} fippi={}",
            self.label(),
            self.comms_loaded(),
            self.fippi_loaded()
        );
        Ok(())
    }

    /// Load the FPGAs
    ///
    /// Booting the communications FPGA clears the FiPPIs, so they are
    /// loaded as well when they were not already.
    ///
    /// # Errors
    ///
    /// - `ModuleOffline` if the module is not open
    /// - `ModuleInitializeFailure` for missing firmware or a FiPPI boot with
    ///   no communications FPGA
    /// - `DeviceLoadFailure`/`DeviceImageFailure` from the FPGA loader
    pub fn boot(&self, params: &BootParams, firmware: &FirmwareSet) -> Result<()> {
        let _lock = self.lock();

        if !self.opened() {
            return Err(self.error(PixieError::offline("module not open")));
        }

        if self.forced_offline() {
            warn!("{}module is forced offline, no boot performed", self.label());
            return Ok(());
        }

        if self.online() && (params.boot_comms || params.boot_fippi) {
            warn!("{}booting online module", self.label());
        }

        self.online.store(false, Ordering::Release);

        let mut boot_fippi = params.boot_fippi;
        if params.boot_comms && !self.fippi_loaded() {
            debug!("{}fippi load forced", self.label());
            boot_fippi = true;
        }

        let mut backoff = 0;

        if params.boot_comms {
            if self.comms_loaded() {
                info!("{}comms already loaded", self.label());
            }
            let image = firmware.image("sys").map_err(|e| self.error(e))?;
            self.comms_fpga.store(false, Ordering::Release);
            self.fippi_fpga.store(false, Ordering::Release);
            backoff = fpga::boot_comms(self, image, backoff, params.retries, &params.timing)
                .map_err(|e| self.error(e))?;
            self.comms_fpga.store(fpga::comms_done(self), Ordering::Release);
        }

        if boot_fippi {
            if self.fippi_loaded() {
                info!("{}fippi already loaded", self.label());
            }
            if !self.comms_loaded() {
                return Err(self.error(PixieError::initialize_failure(
                    "fippi boot needs comms booted",
                )));
            }
            let image = firmware.image("fippi").map_err(|e| self.error(e))?;
            self.fippi_fpga.store(false, Ordering::Release);
            fpga::boot_fippi(self, image, backoff, params.retries, &params.timing)
                .map_err(|e| self.error(e))?;
            self.fippi_fpga.store(fpga::fippi_done(self), Ordering::Release);
        }

        let online = self.comms_loaded() && self.fippi_loaded();

        info!(
            "{}boot: sys-fpga={} fippi-fpga={}",
            self.label(),
            self.comms_loaded(),
            self.fippi_loaded()
        );

        if online {
            let guard = self.bus_guard()?;
            csr::reset(&guard);
        }

        self.online.store(online, Ordering::Release);
        Ok(())
    }

    /// Bring an opened, loaded module back online
    ///
    /// # Errors
    ///
    /// `ModuleOffline` if the FPGAs are not loaded.
    pub fn force_online(&self) -> Result<()> {
        info!("{}set online", self.label());
        let _lock = self.lock();
        if self.opened() && !self.online() {
            let comms = fpga::comms_done(self);
            let fippi = comms && fpga::fippi_done(self);
            self.comms_fpga.store(comms, Ordering::Release);
            self.fippi_fpga.store(fippi, Ordering::Release);
            if !(comms && fippi) {
                error!("{}force online: module needs booting", self.label());
                return Err(self.error(PixieError::offline("module needs booting")));
            }
            self.online.store(true, Ordering::Release);
            self.forced_offline.store(false, Ordering::Release);
        }
        Ok(())
    }

    /// Take the module offline, ending any run
    pub fn force_offline(&self) {
        info!("{}set offline", self.label());
        let _lock = self.lock();
        if self.opened() && !self.forced_offline() {
            if self.online() {
                if let Err(e) = run::end(self) {
                    error!("{}force offline: {e}", self.label());
                }
            }
            self.forced_offline.store(true, Ordering::Release);
            self.backplane.offline(self);
        }
    }

    /// Close the module
    ///
    /// The device mapping is released when the module is dropped.
    pub fn close(&self) {
        let _lock = self.lock();
        if self.opened() {
            info!("{}close: device-number={}", self.label(), self.device_number);
            self.force_offline();
            for role in self.roles() {
                role.release(self);
            }
            self.comms_fpga.store(false, Ordering::Release);
            self.fippi_fpga.store(false, Ordering::Release);
            self.online.store(false, Ordering::Release);
            self.forced_offline.store(false, Ordering::Release);
            self.opened.store(false, Ordering::Release);
        }
    }

    // ── Backplane ────────────────────────────────────────────────────────

    fn roles(&self) -> [&Role; 3] {
        [
            &self.backplane.wired_or_triggers_pullup,
            &self.backplane.run,
            &self.backplane.director,
        ]
    }

    fn claim(&self, role: &Role, claim: bool, what: &str) -> Result<()> {
        if claim {
            if !role.request(self) {
                let leader = role
                    .slot()
                    .map_or_else(|| "none".to_string(), |slot| slot.to_string());
                return Err(self.error(PixieError::invalid_param(format!(
                    "{what} leader role already taken: slot: {leader}"
                ))));
            }
        } else {
            role.release(self);
        }
        Ok(())
    }

    /// Claim or release the backplane roles selected by a `ModCSRB` value
    ///
    /// # Errors
    ///
    /// `ModuleInvalidParam` if a requested role has another leader.
    pub fn backplane_csrb(&self, csrb: Word) -> Result<()> {
        let bp = &self.backplane;
        self.claim(
            &bp.wired_or_triggers_pullup,
            csrb & mask(modcsrb::CPLDPULLUP) != 0,
            "wired-or trigger pullups",
        )?;
        self.claim(&bp.run, csrb & mask(modcsrb::CHASSISMASTER) != 0, "run")?;
        self.claim(&bp.director, csrb & mask(modcsrb::DIRMOD) != 0, "director")
    }

    /// Drive the pull-ups the module's backplane roles own
    ///
    /// # Errors
    ///
    /// `InternalFailure` if the bus lock is poisoned.
    pub fn sync_csrb(&self) -> Result<()> {
        let guard = self.bus_guard()?;

        let mut ctrl = self.cfg_ctrlcs.load(Ordering::Acquire);
        if self.backplane.wired_or_triggers_pullup.is_leader(self) {
            ctrl |= mask(cpld::PULLUP);
        } else {
            ctrl &= !mask(cpld::PULLUP);
        }
        if matches!(self.rev_tag(), Some(RevTag::RevB | RevTag::RevC)) {
            ctrl |= mask(cpld::BPCONNECT);
        }
        self.cfg_ctrlcs.store(ctrl, Ordering::Release);
        self.write_word(regs::CFG_CTRLCS, ctrl);

        if self.backplane.run.is_leader(self) {
            csr::set(&guard, mask(regs::csr::PULLUP_CTRL));
        } else {
            csr::clear(&guard, mask(regs::csr::PULLUP_CTRL));
        }
        Ok(())
    }

    /// Enter or leave the sync-wait state
    ///
    /// # Errors
    ///
    /// `InternalFailure` if the crate's sync-wait count is inconsistent.
    pub fn set_sync_wait(&self, requested: bool) -> Result<()> {
        self.sync_wait.store(requested, Ordering::Release);
        self.backplane
            .sync_wait(self, requested)
            .map_err(|e| self.error(e))
    }

    // ── Run control ──────────────────────────────────────────────────────

    /// Is a run or control task active?
    ///
    /// # Errors
    ///
    /// `InternalFailure` if the bus lock is poisoned.
    pub fn run_active(&self) -> Result<bool> {
        if !self.online() {
            return Ok(false);
        }
        let _lock = self.lock();
        run::active(self)
    }

    /// Start a histogram run
    ///
    /// # Errors
    ///
    /// - `ModuleOffline` if the module is offline
    /// - `ModuleInvalidOperation` if a task is running or the crate's
    ///   sync-wait state is inconsistent
    pub fn start_histograms(&self, mode: RunMode) -> Result<()> {
        info!("{}start-histograms: mode={mode}", self.label());
        self.online_check()?;
        let _lock = self.lock();
        if self.run_active()? {
            return Err(self.error(PixieError::invalid_operation(
                "module already running a task",
            )));
        }
        self.backplane.sync_wait_valid().map_err(|e| self.error(e))?;
        run::run(self, mode, RunTask::Histogram).map_err(|e| self.error(e))
    }

    /// Start a list mode run
    ///
    /// # Errors
    ///
    /// As [`Module::start_histograms`].
    pub fn start_listmode(&self, mode: RunMode) -> Result<()> {
        info!("{}start-list-mode: mode={mode}", self.label());
        self.online_check()?;
        let _lock = self.lock();
        if self.run_task() != RunTask::Nop {
            return Err(self.error(PixieError::invalid_operation(
                "module already running a task",
            )));
        }
        self.backplane.sync_wait_valid().map_err(|e| self.error(e))?;
        run::run(self, mode, RunTask::ListMode).map_err(|e| self.error(e))
    }

    /// End the active run
    ///
    /// # Errors
    ///
    /// `ModuleTaskTimeout` if the DSP does not end the run in time.
    pub fn end_run(&self) -> Result<()> {
        self.online_check()?;
        let _lock = self.lock();
        info!("{}run-end: attempting to stop run", self.label());
        if self.run_task() == RunTask::Nop {
            warn!("{}run-end: no run active", self.label());
        }
        run::end(self).map_err(|e| self.error(e))
    }

    /// Run a DSP control task to completion
    ///
    /// # Errors
    ///
    /// `ModuleTaskTimeout` if the task does not finish in time.
    pub fn control(&self, task: ControlTask) -> Result<()> {
        info!("{}control: {task}", self.label());
        self.online_check()?;
        let _lock = self.lock();
        run::control(self, task).map_err(|e| self.error(e))
    }
}

impl BackplaneMember for Module {
    fn slot(&self) -> Slot {
        self.slot
    }

    fn opened(&self) -> bool {
        Module::opened(self)
    }

    fn online(&self) -> bool {
        Module::online(self)
    }

    fn sync_wait_requested(&self) -> bool {
        self.sync_wait()
    }
}
