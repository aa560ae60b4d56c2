//! Contention backoff shared by both lock algorithms.
//!
//! A waiter spins [`SPIN_COUNT`] times with a pause hint between
//! observations, then sleeps. The sleep starts at the per-algorithm step
//! and grows by the same step on every pass, so a long wait yields the
//! CPU to the holder progressively harder. Under loom both the hint and
//! the sleep become `yield_now` and the spin count collapses to 1 to keep
//! models tractable.

#[cfg(loom)]
use loom::thread;
#[cfg(not(loom))]
use std::thread;

use std::time::Duration;

use crate::atomic::acquire_fence;

/// Iterations of the inner observation loop before giving up the CPU.
/// Short spins behave better on Unix schedulers; Windows timeslices are
/// long enough that spinning further is cheaper than an early sleep.
#[cfg(loom)]
pub(crate) const SPIN_COUNT: usize = 1;
#[cfg(all(not(loom), windows))]
pub(crate) const SPIN_COUNT: usize = 100_000;
#[cfg(all(not(loom), not(windows)))]
pub(crate) const SPIN_COUNT: usize = 500;

/// CPU pause hint for one spin iteration.
pub(crate) fn pause() {
    #[cfg(loom)]
    thread::yield_now();
    #[cfg(not(loom))]
    std::hint::spin_loop();
}

/// Additive sleep schedule between spin passes.
pub(crate) struct Backoff {
    sleep: Duration,
    step: Duration,
}

impl Backoff {
    pub(crate) fn new(step: Duration) -> Backoff {
        Backoff { sleep: step, step }
    }

    /// Give up the CPU to the lock holder(s), longer on every call.
    pub(crate) fn snooze(&mut self) {
        #[cfg(loom)]
        thread::yield_now();
        #[cfg(not(loom))]
        thread::sleep(self.sleep);
        self.sleep += self.step;
    }
}

/// Spin until `done` returns true, sleeping on the additive schedule
/// between passes. `done` may observe with relaxed loads; the acquire
/// fence here orders the final observation before the caller proceeds.
pub(crate) fn spin_wait(step: Duration, mut done: impl FnMut() -> bool) {
    let mut backoff = Backoff::new(step);
    loop {
        for _ in 0..SPIN_COUNT {
            if done() {
                acquire_fence();
                return;
            }
            pause();
        }
        backoff.snooze();
    }
}
