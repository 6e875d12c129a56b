//! Exponential backoff for idle loops.

use std::hint::spin_loop;
use std::thread;

/// Spin, then yield, then report completion so the caller can block.
#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;
    const YIELD_LIMIT: u32 = 10;

    pub fn new() -> Self {
        Self { step: 0 }
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// Perform one step of backoff
    pub fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..(1u32 << self.step) {
                spin_loop();
            }
        } else {
            thread::yield_now();
        }

        if self.step <= Self::YIELD_LIMIT {
            self.step += 1;
        }
    }

    /// True once spinning and yielding are exhausted
    pub fn is_completed(&self) -> bool {
        self.step > Self::YIELD_LIMIT
    }
}

/// Busy-waits for `iterations` spin-loop hints without yielding the thread.
pub fn spin_wait(iterations: u32) {
    for _ in 0..iterations {
        spin_loop();
    }
}
