pub mod cpulist;

use std::time::{Duration, Instant};

/// Busy-waits for roughly `duration` to perturb thread timing.
#[inline]
pub fn spin_for(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    let start = Instant::now();
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}
