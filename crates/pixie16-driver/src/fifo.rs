//! FIFO watermark wait

use crate::error::{PixieError, Result};
use crate::module::BusGuard;
use pixie16_chip::regs;

/// Poll the FIFO level until it holds `words`
///
/// There is no sleep between polls; the FIFO fills at bus speed once the
/// transfer is started.
///
/// # Errors
///
/// `DeviceFifoFailure` if the level does not reach `words` in `polls` reads.
pub fn watermark_wait(guard: &BusGuard<'_>, words: usize, polls: usize) -> Result<()> {
    let module = guard.module();
    for _ in 0..polls {
        if module.read_word(regs::RD_WRT_FIFO_WML) as usize >= words {
            return Ok(());
        }
    }
    Err(module.error(PixieError::fifo_failure(
        "FIFO failed to reach watermark",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimBackend;
    use crate::module::tests::sim_module;
    use crate::ErrorCode;

    #[test]
    fn level_reached() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        sim.push_fifo(&[0; 10]);
        let guard = module.bus_guard().unwrap();
        watermark_wait(&guard, 10, 1).unwrap();
    }

    #[test]
    fn polls_are_bounded() {
        let sim = SimBackend::new();
        let module = sim_module(&sim);
        sim.on_read(regs::RD_WRT_FIFO_WML, || 3);
        let guard = module.bus_guard().unwrap();
        let err = watermark_wait(&guard, 4, 1000).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeviceFifoFailure);
        assert!(err.to_string().starts_with("module 2 slot 2: "));
        assert_eq!(sim.reads(regs::RD_WRT_FIFO_WML), 1000);
    }
}
