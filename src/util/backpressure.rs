//! Admission control for pool queues.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Bounded admission counter.
///
/// Tracks how many jobs are queued or running and refuses new ones once the
/// bound is reached. Rejections are counted by the pool's metrics.
#[derive(Debug)]
pub struct BackpressureController {
    max_queue_size: usize,
    current_queue_size: AtomicUsize,
}

impl BackpressureController {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            max_queue_size,
            current_queue_size: AtomicUsize::new(0),
        }
    }

    /// Reserve a slot for a new job. Returns `false` when over capacity.
    pub fn on_enqueue(&self) -> bool {
        let max = self.max_queue_size;
        self.current_queue_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .is_ok()
    }

    /// Release the slot of a finished job
    pub fn on_complete(&self) {
        self.current_queue_size.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backpressure_admit() {
        let controller = BackpressureController::new(10);

        for _ in 0..10 {
            assert!(controller.on_enqueue());
        }

        // full
        assert!(!controller.on_enqueue());

        controller.on_complete();
        assert!(controller.on_enqueue());
        assert!(!controller.on_enqueue());
    }

    #[test]
    fn test_zero_capacity_rejects_everything() {
        let controller = BackpressureController::new(0);
        assert!(!controller.on_enqueue());
    }
}
