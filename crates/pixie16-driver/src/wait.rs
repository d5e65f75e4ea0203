//! Bounded busy waits used by the polling loops.

use std::time::{Duration, Instant};

/// Waits below this spin; longer waits sleep the thread.
const SPIN_LIMIT_US: u64 = 100;

/// Wait `usecs` microseconds.
pub(crate) fn usecs(usecs: u64) {
    if usecs == 0 {
        return;
    }
    let period = Duration::from_micros(usecs);
    if usecs < SPIN_LIMIT_US {
        let start = Instant::now();
        while start.elapsed() < period {
            std::hint::spin_loop();
        }
    } else {
        std::thread::sleep(period);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_at_least_the_period() {
        for us in [0, 20, 150] {
            let start = Instant::now();
            usecs(us);
            assert!(start.elapsed() >= Duration::from_micros(us));
        }
    }
}
