// worker thread stuff
use super::pool::PoolShared;
use super::task::Task;
use crate::util::Backoff;
use crossbeam_deque::{Steal, Stealer, Worker as WorkerQueue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type WorkerId = usize;

// stats for each worker
#[derive(Debug, Default)]
pub struct WorkerState {
    pub tasks_executed: AtomicU64,
    pub tasks_stolen: AtomicU64,
}

pub(crate) struct Worker {
    pub id: WorkerId,
    pub local_queue: WorkerQueue<Task>,
    pub state: WorkerState,
}

impl Worker {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            local_queue: WorkerQueue::new_fifo(),
            state: WorkerState::default(),
        }
    }

    // main loop
    pub fn run(self, shared: Arc<PoolShared>) {
        let mut backoff = Backoff::new();

        loop {
            // Priority: local -> global -> steal
            if let Some(task) = self.find_task(&shared) {
                backoff.reset();
                shared.run_task(task);
                self.state.tasks_executed.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            // queues are drained at this point
            if shared.shutdown.load(Ordering::Acquire) {
                break;
            }

            if shared.over_max() && shared.try_retire(true) {
                self.retire(&shared);
                return;
            }

            if !backoff.is_completed() {
                backoff.snooze();
                continue;
            }

            if !shared.wait_for_work() && shared.try_retire(false) {
                self.retire(&shared);
                return;
            }
            backoff.reset();
        }

        self.unregister(&shared);
    }

    fn find_task(&self, shared: &PoolShared) -> Option<Task> {
        // 1. Check local queue first (best cache locality)
        if let Some(task) = self.local_queue.pop() {
            return Some(task);
        }

        // 2. Check global injector queue
        loop {
            match shared.injector.steal_batch_and_pop(&self.local_queue) {
                Steal::Success(task) => return Some(task),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }

        // 3. Steal from other workers
        let stealers = shared.stealers.read();
        self.try_steal_from_workers(&stealers)
    }

    fn try_steal_from_workers(&self, stealers: &[(WorkerId, Stealer<Task>)]) -> Option<Task> {
        use rand::seq::SliceRandom;
        use rand::thread_rng;

        if stealers.len() < 2 {
            return None;
        }

        let mut indices: Vec<usize> = (0..stealers.len()).collect();
        indices.shuffle(&mut thread_rng());

        for &idx in &indices {
            let (owner, stealer) = &stealers[idx];
            if *owner == self.id {
                continue;
            }

            loop {
                match stealer.steal_batch_and_pop(&self.local_queue) {
                    Steal::Success(task) => {
                        self.state.tasks_stolen.fetch_add(1, Ordering::Relaxed);
                        return Some(task);
                    }
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }

        None
    }

    fn unregister(&self, shared: &PoolShared) {
        // hand back anything still queued locally
        while let Some(task) = self.local_queue.pop() {
            shared.injector.push(task);
        }
        shared.stealers.write().retain(|(id, _)| *id != self.id);

        tracing::debug!(
            pool = shared.name(),
            worker = self.id,
            executed = self.state.tasks_executed.load(Ordering::Relaxed),
            stolen = self.state.tasks_stolen.load(Ordering::Relaxed),
            "worker exiting"
        );
    }

    fn retire(&self, shared: &Arc<PoolShared>) {
        self.unregister(shared);

        // a job may have arrived while this worker was timing out
        if !shared.injector.is_empty() {
            PoolShared::grow(shared);
            shared.notify_one();
        }
    }
}
