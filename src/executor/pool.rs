use super::panic_handler::PanicHandler;
use super::task::Task;
use super::worker::{Worker, WorkerId};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::telemetry::{Metrics, MetricsSnapshot};
use crate::util::BackpressureController;
use crossbeam_deque::{Injector, Stealer};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Thread counts of one pool lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LaneState {
    /// Worker threads currently alive
    pub live: usize,
    /// Live workers parked waiting for work
    pub idle: usize,
    pub min: usize,
    pub max: usize,
}

/// Dynamically sized work-stealing pool.
///
/// Workers are spawned on demand, up to `max`; workers above `min` retire
/// after sitting idle for the configured keep-alive.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

pub(crate) struct PoolShared {
    name: String,
    thread_name_prefix: String,
    stack_size: Option<usize>,
    keep_alive: Duration,

    pub(crate) injector: Injector<Task>,
    pub(crate) stealers: RwLock<Vec<(WorkerId, Stealer<Task>)>>,

    min: AtomicUsize,
    max: AtomicUsize,
    live: AtomicUsize,
    idle: AtomicUsize,
    next_worker_id: AtomicUsize,
    pending: AtomicUsize,
    pub(crate) shutdown: AtomicBool,

    sleep_lock: Mutex<()>,
    wake: Condvar,

    threads: Mutex<Vec<JoinHandle<()>>>,
    backpressure: BackpressureController,
    panic_handler: PanicHandler,
    metrics: Metrics,
}

impl WorkerPool {
    pub fn new(config: &Config, name: &str, min: usize, max: usize) -> Result<Self> {
        if min > max {
            return Err(Error::config(format!(
                "pool `{name}`: min ({min}) exceeds max ({max})"
            )));
        }

        let shared = Arc::new(PoolShared {
            name: name.to_string(),
            thread_name_prefix: format!("{}-{}", config.thread_name_prefix, name),
            stack_size: config.stack_size,
            keep_alive: config.idle_keep_alive,
            injector: Injector::new(),
            stealers: RwLock::new(Vec::new()),
            min: AtomicUsize::new(min),
            max: AtomicUsize::new(max),
            live: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            next_worker_id: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            sleep_lock: Mutex::new(()),
            wake: Condvar::new(),
            threads: Mutex::new(Vec::new()),
            backpressure: BackpressureController::new(config.queue_capacity),
            panic_handler: PanicHandler::new(name, config.panic_strategy),
            metrics: Metrics::new()?,
        });

        tracing::info!(pool = name, min, max, "creating worker pool");

        Ok(Self { shared })
    }

    /// Queue `f` for execution on a pool worker.
    pub fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Task::new(f))
    }

    pub(crate) fn submit(&self, task: Task) -> Result<()> {
        let shared = &self.shared;

        if shared.shutdown.load(Ordering::Acquire) {
            shared.metrics.record_rejection();
            return Err(Error::unavailable(format!(
                "pool `{}` is shut down",
                shared.name
            )));
        }

        if shared.max.load(Ordering::Acquire) == 0 {
            shared.metrics.record_rejection();
            return Err(Error::unavailable(format!(
                "pool `{}` allows no worker threads",
                shared.name
            )));
        }

        if !shared.backpressure.on_enqueue() {
            tracing::debug!(pool = %shared.name, "job rejected, queue full");
            shared.metrics.record_rejection();
            return Err(Error::unavailable(format!(
                "pool `{}` queue is full",
                shared.name
            )));
        }

        tracing::trace!(pool = %shared.name, task = %task.id, "job queued");
        shared.pending.fetch_add(1, Ordering::AcqRel);
        shared.injector.push(task);

        PoolShared::grow(shared);
        shared.notify_one();
        Ok(())
    }

    /// Changes the lane bounds; existing workers adapt as they go idle.
    pub fn set_limits(&self, min: usize, max: usize) -> Result<()> {
        if min > max {
            return Err(Error::config(format!(
                "pool `{}`: min ({min}) exceeds max ({max})",
                self.shared.name
            )));
        }

        self.shared.min.store(min, Ordering::Release);
        self.shared.max.store(max, Ordering::Release);
        tracing::info!(pool = %self.shared.name, min, max, "pool limits changed");

        // let surplus workers notice the new bound
        self.shared.notify_all();
        Ok(())
    }

    pub fn lane_state(&self) -> LaneState {
        LaneState {
            live: self.shared.live.load(Ordering::Acquire),
            idle: self.shared.idle.load(Ordering::Acquire),
            min: self.shared.min.load(Ordering::Acquire),
            max: self.shared.max.load(Ordering::Acquire),
        }
    }

    /// Jobs queued or running
    pub fn pending_tasks(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn completed_tasks(&self) -> u64 {
        self.shared.metrics.completed()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stops admission, lets workers drain queued jobs, then joins them.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(pool = %self.shared.name, "shutting down worker pool");

        // wake everyone up to check shutdown flag
        self.shared.notify_all();

        let current = thread::current().id();
        let threads = std::mem::take(&mut *self.shared.threads.lock());
        for handle in threads {
            // a worker dropping the last coordinator reference must not join itself
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.name)
            .field("lane", &self.lane_state())
            .field("pending", &self.pending_tasks())
            .finish()
    }
}

impl PoolShared {
    /// Spawns workers while below `min`, plus one more if every live worker is busy.
    pub(crate) fn grow(self: &Arc<Self>) {
        let mut spawned_for_load = false;

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let live = self.live.load(Ordering::Acquire);
            let min = self.min.load(Ordering::Acquire);
            let max = self.max.load(Ordering::Acquire);

            let below_min = live < min;
            let starving =
                !spawned_for_load && self.idle.load(Ordering::Acquire) == 0 && live < max;

            if live >= max || !(below_min || starving) {
                break;
            }

            if self
                .live
                .compare_exchange(live, live + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            if !below_min {
                spawned_for_load = true;
            }

            if let Err(err) = self.spawn_worker() {
                self.live.fetch_sub(1, Ordering::AcqRel);
                tracing::warn!(pool = %self.name, error = %err, "failed to spawn worker");
                break;
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>) -> Result<()> {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let worker = Worker::new(id);
        self.stealers.write().push((id, worker.local_queue.stealer()));

        let mut builder = thread::Builder::new().name(format!("{}-{}", self.thread_name_prefix, id));
        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let shared = Arc::clone(self);
        let spawned = builder.spawn(move || worker.run(shared));

        match spawned {
            Ok(handle) => {
                tracing::debug!(pool = %self.name, worker = id, "worker spawned");
                let mut threads = self.threads.lock();
                threads.retain(|t| !t.is_finished());
                threads.push(handle);
                Ok(())
            }
            Err(e) => {
                self.stealers.write().retain(|(wid, _)| *wid != id);
                Err(Error::Io(e))
            }
        }
    }

    pub(crate) fn run_task(&self, task: Task) {
        let start = Instant::now();
        let outcome = self.panic_handler.contain(move || task.execute());
        self.metrics.record_job(start.elapsed(), outcome.is_err());

        self.pending.fetch_sub(1, Ordering::AcqRel);
        self.backpressure.on_complete();
    }

    /// Parks until woken or `keep_alive` passes. Returns `false` on timeout.
    pub(crate) fn wait_for_work(&self) -> bool {
        let mut guard = self.sleep_lock.lock();
        if !self.injector.is_empty() || self.shutdown.load(Ordering::Acquire) {
            return true;
        }

        self.idle.fetch_add(1, Ordering::AcqRel);
        let timed_out = self.wake.wait_for(&mut guard, self.keep_alive).timed_out();
        self.idle.fetch_sub(1, Ordering::AcqRel);

        !timed_out
    }

    /// Leaves the pool if it holds more workers than `floor` allows.
    pub(crate) fn try_retire(&self, over_max: bool) -> bool {
        let floor = if over_max {
            self.max.load(Ordering::Acquire)
        } else {
            self.min.load(Ordering::Acquire)
        };

        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live > floor).then(|| live - 1)
            })
            .is_ok()
    }

    pub(crate) fn over_max(&self) -> bool {
        self.live.load(Ordering::Acquire) > self.max.load(Ordering::Acquire)
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn notify_one(&self) {
        let _guard = self.sleep_lock.lock();
        self.wake.notify_one();
    }

    pub(crate) fn notify_all(&self) {
        let _guard = self.sleep_lock.lock();
        self.wake.notify_all();
    }
}
