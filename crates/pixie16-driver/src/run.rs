//! Run and control task sequencing
//!
//! A task is started by setting `RUNENA` in the CSR. The DSP runs it, and for
//! a run clears `RUNACTIVE` once the last data is in the external FIFO.
//! Ending a run clears `RUNENA` and waits for both bits to drop.

use crate::csr;
use crate::error::{PixieError, Result};
use crate::memory::Mca;
use crate::module::Module;
use crate::wait;
use pixie16_chip::hw::{Word, LARGE_HISTOGRAM_LENGTH};
use pixie16_chip::regs::csr::{mask, RUNACTIVE, RUNENA};
use std::time::Instant;
use tracing::{debug, error};

/// How a run starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Continue the previous run's data
    Resume,
    /// Clear histogram memory and start fresh
    NewRun,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resume => write!(f, "resume"),
            Self::NewRun => write!(f, "new_run"),
        }
    }
}

/// Data acquisition task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTask {
    /// No run
    Nop,
    /// List mode: events streamed through the external FIFO
    ListMode,
    /// Histograms accumulated in MCA memory
    Histogram,
    /// A run is being ended
    Stopping,
}

impl std::fmt::Display for RunTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nop => write!(f, "nop"),
            Self::ListMode => write!(f, "list_mode"),
            Self::Histogram => write!(f, "histogram"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// DSP control task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlTask {
    /// No control task
    Nop,
    /// Program the offset DACs
    SetDacs,
    /// Enable the analog inputs
    EnableInput,
    /// Ramp the offset DACs
    RampOffsetDacs,
    /// Capture ADC traces
    GetTraces,
    /// Program the FiPPIs from the DSP parameters
    ProgramFippi,
    /// Measure baselines
    GetBaselines,
    /// Adjust the DC offsets
    AdjustOffsets,
    /// Estimate decay times
    TauFinder,
    /// Reset the ADCs
    ResetAdc,
}

impl std::fmt::Display for ControlTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Nop => "nop",
            Self::SetDacs => "set_dacs",
            Self::EnableInput => "enable_input",
            Self::RampOffsetDacs => "ramp_offsetdacs",
            Self::GetTraces => "get_traces",
            Self::ProgramFippi => "program_fippi",
            Self::GetBaselines => "get_baselines",
            Self::AdjustOffsets => "adjust_offsets",
            Self::TauFinder => "tau_finder",
            Self::ResetAdc => "reset_adc",
        };
        f.write_str(label)
    }
}

/// Is a run or control task active?
///
/// # Errors
///
/// `InternalFailure` if the bus lock is poisoned.
pub fn active(module: &Module) -> Result<bool> {
    let guard = module.bus_guard()?;
    Ok(csr::read(&guard) & (mask(RUNENA) | mask(RUNACTIVE)) != 0)
}

/// End any active task, prepare memory and start a task
///
/// A new histogram or list mode run zeroes the histogram memory first.
///
/// # Errors
///
/// `ModuleTaskTimeout` if an active task does not end, or a transfer
/// error while clearing histogram memory.
pub fn start(module: &Module, mode: RunMode, run: RunTask, control: ControlTask) -> Result<()> {
    debug!(
        "{}run: start: run-mode={mode} run-task={run} control-task={control}",
        module.label()
    );

    end(module)?;

    if mode == RunMode::NewRun && run != RunTask::Nop {
        let block = LARGE_HISTOGRAM_LENGTH * 4;
        let mca_end = LARGE_HISTOGRAM_LENGTH * module.num_channels();
        let zero: Vec<Word> = vec![0; block];
        let mca = Mca::new(module);
        for addr in (0..mca_end).step_by(block) {
            let len = block.min(mca_end - addr);
            mca.write(to_address(addr)?, &zero[..len])?;
        }
    }
    module.set_tasks(run, control);

    let guard = module.bus_guard()?;
    csr::set(&guard, mask(RUNENA));
    Ok(())
}

fn to_address(addr: usize) -> Result<u32> {
    u32::try_from(addr).map_err(|_| PixieError::internal(format!("MCA address overflow: {addr}")))
}

/// Start a data acquisition run
///
/// # Errors
///
/// As [`start`].
pub fn run(module: &Module, mode: RunMode, task: RunTask) -> Result<()> {
    debug!("{}run: mode={mode} run={task}", module.label());
    start(module, mode, task, ControlTask::Nop)
}

/// End the active task
///
/// `RUNENA` is cleared on each poll until the DSP drops both run bits.
///
/// # Errors
///
/// `ModuleTaskTimeout` if the task is still active after the end wait;
/// the module then needs rebooting.
pub fn end(module: &Module) -> Result<()> {
    if active(module)? {
        debug!("{}run: ending", module.label());
        let timing = *module.run_timing();
        let start = Instant::now();
        module.set_tasks(RunTask::Stopping, module.control_task());
        let mut ended = false;
        for _ in 0..timing.polls() {
            {
                let guard = module.bus_guard()?;
                csr::clear(&guard, mask(RUNENA));
            }
            if !active(module)? {
                debug!("{}run: ended, duration={:?}", module.label(), start.elapsed());
                ended = true;
                break;
            }
            wait::usecs(timing.poll_us);
        }
        if !ended {
            module.set_tasks(RunTask::Nop, ControlTask::Nop);
            error!("{}run: failed to end task; module reboot required", module.label());
            return Err(PixieError::task_timeout(
                "failed to end active run task; module reboot required",
            ));
        }
    }
    module.set_tasks(RunTask::Nop, ControlTask::Nop);
    Ok(())
}

/// Run a DSP control task and wait for it to finish
///
/// # Errors
///
/// `ModuleTaskTimeout` if the task is still active after the end wait.
pub fn control(module: &Module, task: ControlTask) -> Result<()> {
    let timing = *module.run_timing();
    debug!("{}run: control={task}", module.label());
    let start_time = Instant::now();
    start(module, RunMode::NewRun, RunTask::Nop, task)?;
    for _ in 0..timing.polls() {
        if !active(module)? {
            module.set_tasks(RunTask::Nop, ControlTask::Nop);
            debug!(
                "{}control: control={task} duration={:?}",
                module.label(),
                start_time.elapsed()
            );
            return Ok(());
        }
        wait::usecs(timing.poll_us);
    }
    Err(PixieError::task_timeout(format!(
        "control task failed to end: {task}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimBackend;
    use crate::config::RunTiming;
    use crate::module::tests::sim_device;
    use crate::{Backplane, ErrorCode};
    use pixie16_chip::regs;
    use std::sync::Arc;

    fn fast_module(sim: &SimBackend) -> Module {
        Module::open(sim_device(sim, 2), Arc::new(Backplane::new()))
            .unwrap()
            .with_run_timing(RunTiming::default().with_end_wait_ms(5).with_poll_us(0))
    }

    #[test]
    fn start_sets_runena() {
        let sim = SimBackend::new();
        let module = fast_module(&sim);
        run(&module, RunMode::Resume, RunTask::ListMode).unwrap();
        assert_ne!(sim.register(regs::CSR) & mask(RUNENA), 0);
        assert!(active(&module).unwrap());
        assert_eq!(module.run_task(), RunTask::ListMode);
    }

    #[test]
    fn end_clears_runena() {
        let sim = SimBackend::new();
        let module = fast_module(&sim);
        run(&module, RunMode::Resume, RunTask::Histogram).unwrap();
        end(&module).unwrap();
        assert!(!active(&module).unwrap());
        assert_eq!(module.run_task(), RunTask::Nop);
    }

    #[test]
    fn stuck_run_times_out() {
        let sim = SimBackend::new();
        let module = fast_module(&sim);
        sim.on_read(regs::CSR, || mask(RUNACTIVE));
        let err = end(&module).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ModuleTaskTimeout);
        assert!(err.to_string().contains("module reboot required"));
        assert_eq!(module.run_task(), RunTask::Nop);
    }

    #[test]
    fn new_run_clears_histogram_memory() {
        let sim = SimBackend::new();
        let module = fast_module(&sim);
        sim.set_mca_words(100, &[7; 8]);
        run(&module, RunMode::NewRun, RunTask::Histogram).unwrap();
        assert_eq!(sim.mca_words(100, 8), vec![0; 8]);
        assert_eq!(sim.register(regs::CSR) & mask(regs::csr::PCIACTIVE), 0);
    }

    #[test]
    fn control_task_waits_for_dsp() {
        let sim = SimBackend::new();
        let module = fast_module(&sim);
        // Reads 1 and 2 are the idle check and the RUNENA set.
        let mut polls = 0;
        sim.on_read(regs::CSR, move || {
            polls += 1;
            if (3..=5).contains(&polls) {
                mask(RUNACTIVE)
            } else {
                0
            }
        });
        control(&module, ControlTask::GetTraces).unwrap();
        assert_eq!(module.control_task(), ControlTask::Nop);
        assert_eq!(sim.reads(regs::CSR), 6);
    }

    #[test]
    fn control_task_timeout() {
        let sim = SimBackend::new();
        let module = fast_module(&sim);
        let mut polls = 0;
        sim.on_read(regs::CSR, move || {
            polls += 1;
            if polls > 2 {
                mask(RUNACTIVE)
            } else {
                0
            }
        });
        let err = control(&module, ControlTask::SetDacs).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ModuleTaskTimeout);
        assert!(err.to_string().contains("set_dacs"));
    }
}
