//! The coordinator: one owned value tying pools, timers, primitives and
//! reporting together.

mod continuation;
mod introspect;

pub use continuation::{ContinuationOptions, RunOn, WaitMode};
pub use introspect::PoolState;

use crate::cancel::CancellationSignal;
use crate::config::{Config, PoolLimits};
use crate::error::{Failure, Result};
use crate::executor::{WorkItem, WorkerPool};
use crate::handle::{Completed, CreationOptions, ExecutionHandle, TaskStatus};
use crate::report::Reporter;
use crate::sync::{self, MutexStrategy, SyncPrimitives};
use crate::thread::{spawn_thread, ThreadSpec};
use crate::timer::{Delay, PeriodicTimer, TimerService};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Where a started handle runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SchedulerHint {
    /// The shared worker pool
    #[default]
    Pool,
    /// The I/O pool
    Io,
    /// Inline on the thread that starts it
    CurrentThread,
}

/// How [`Coordinator::start`] waits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StartMode {
    /// Run on the calling thread; return when done.
    Synchronous,
    /// Run on the scheduler; return once the handle is terminal.
    Asynchronous,
    /// Run on the scheduler; return at once.
    #[default]
    Detached,
}

/// Routes started handles to a pool, a dedicated thread or the caller.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    pub(crate) workers: Arc<WorkerPool>,
    pub(crate) io: Arc<WorkerPool>,
    thread_name_prefix: Arc<str>,
}

impl Dispatcher {
    /// Moves `handle` from Pending to Running and hands its work over.
    ///
    /// If the scheduler refuses the work the handle ends Faulted with the
    /// refusal as its failure.
    pub(crate) fn dispatch<T>(&self, handle: &ExecutionHandle<T>, hint: SchedulerHint) -> Result<()>
    where
        T: Send + 'static,
    {
        let work = handle.begin()?;

        if hint == SchedulerHint::CurrentThread {
            handle.execute(work);
            return Ok(());
        }

        let runner = handle.clone();
        let submitted = if handle.options().long_running {
            let spec = ThreadSpec::new().name(format!(
                "{}-long-{}",
                self.thread_name_prefix,
                handle.id().as_u64()
            ));
            spawn_thread(spec, move |work: WorkItem<T>| runner.execute(work), work).map(|_| ())
        } else {
            let pool = match hint {
                SchedulerHint::Io => &self.io,
                _ => &self.workers,
            };
            pool.execute(move || runner.execute(work))
        };

        if let Err(err) = submitted {
            tracing::warn!(task = %handle.id(), error = %err, "work item rejected");
            handle.finish(Err(Failure::from_error(&err)));
            return Err(err);
        }
        Ok(())
    }
}

/// Owns the worker and I/O pools, the timer thread, one primitive per
/// [`MutexStrategy`], and the reporter.
///
/// Dropping the coordinator shuts everything down; queued work is drained
/// first.
pub struct Coordinator {
    config: Config,
    pub(crate) dispatcher: Dispatcher,
    limits: Mutex<PoolLimits>,
    sync: Arc<SyncPrimitives>,
    pub(crate) timer: TimerService,
    pub(crate) reporter: Reporter,
}

impl Coordinator {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_reporter(config, Reporter::default())
    }

    pub fn with_reporter(config: Config, reporter: Reporter) -> Result<Self> {
        config.validate()?;
        let limits = config.limits;

        let workers = Arc::new(WorkerPool::new(
            &config,
            "worker",
            limits.min_workers,
            limits.max_workers,
        )?);
        let io = Arc::new(WorkerPool::new(&config, "io", limits.min_io, limits.max_io)?);
        let timer = TimerService::new(format!("{}-timer", config.thread_name_prefix))?;

        tracing::info!(
            min_workers = limits.min_workers,
            max_workers = limits.max_workers,
            min_io = limits.min_io,
            max_io = limits.max_io,
            "coordinator started"
        );

        Ok(Self {
            dispatcher: Dispatcher {
                workers,
                io,
                thread_name_prefix: Arc::from(config.thread_name_prefix.as_str()),
            },
            limits: Mutex::new(limits),
            sync: Arc::new(SyncPrimitives::new()),
            timer,
            reporter,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn worker_pool(&self) -> &WorkerPool {
        &self.dispatcher.workers
    }

    pub(crate) fn io_pool(&self) -> &WorkerPool {
        &self.dispatcher.io
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Fire-and-forget execution on the worker pool.
    ///
    /// Failures are logged and recorded on the returned handle, never raised.
    pub fn submit_background<T>(&self, work: WorkItem<T>) -> Result<ExecutionHandle<T>>
    where
        T: Send + 'static,
    {
        let handle = ExecutionHandle::pending(
            work,
            CancellationSignal::new(),
            CreationOptions::default(),
        );
        let id = handle.id();
        let observed = handle.clone();
        handle.on_terminal(move |status| {
            if status == TaskStatus::Faulted {
                if let Some(failure) = observed.failure() {
                    tracing::warn!(task = %id, %failure, "background work failed");
                }
            }
        });

        self.dispatcher.dispatch(&handle, SchedulerHint::Pool)?;
        Ok(handle)
    }

    /// Like [`submit_background`](Self::submit_background), on the I/O pool.
    pub fn submit_io<T>(&self, work: WorkItem<T>) -> Result<ExecutionHandle<T>>
    where
        T: Send + 'static,
    {
        let handle = ExecutionHandle::pending(
            work,
            CancellationSignal::new(),
            CreationOptions::default(),
        );
        self.dispatcher.dispatch(&handle, SchedulerHint::Io)?;
        Ok(handle)
    }

    /// A Pending handle; nothing runs until [`start`](Self::start).
    pub fn create_deferred<T>(
        &self,
        work: WorkItem<T>,
        cancel: CancellationSignal,
        options: CreationOptions,
    ) -> ExecutionHandle<T>
    where
        T: Send + 'static,
    {
        let handle = ExecutionHandle::pending(work, cancel, options);
        handle.on_signal(|pending| {
            pending.cancel_pending();
        });
        handle
    }

    /// Submits `work` to the worker pool right away.
    pub fn run_immediate<T>(
        &self,
        work: WorkItem<T>,
        cancel: CancellationSignal,
    ) -> Result<ExecutionHandle<T>>
    where
        T: Send + 'static,
    {
        let handle = ExecutionHandle::pending(work, cancel, CreationOptions::default());
        if handle.is_canceled() {
            return Ok(handle);
        }
        self.dispatcher.dispatch(&handle, SchedulerHint::Pool)?;
        Ok(handle)
    }

    /// Starts a Pending handle. Fails with `InvalidState` otherwise.
    pub fn start<T>(
        &self,
        handle: &ExecutionHandle<T>,
        hint: SchedulerHint,
        mode: StartMode,
    ) -> Result<()>
    where
        T: Send + 'static,
    {
        match mode {
            StartMode::Synchronous => self.dispatcher.dispatch(handle, SchedulerHint::CurrentThread),
            StartMode::Asynchronous => {
                self.dispatcher.dispatch(handle, hint)?;
                handle.wait();
                Ok(())
            }
            StartMode::Detached => self.dispatcher.dispatch(handle, hint),
        }
    }

    /// Starts a Pending handle on `hint` and resolves with its terminal
    /// status without parking the caller.
    pub async fn start_async<T>(
        &self,
        handle: &ExecutionHandle<T>,
        hint: SchedulerHint,
    ) -> Result<TaskStatus>
    where
        T: Send + 'static,
    {
        self.dispatcher.dispatch(handle, hint)?;
        Ok(handle.terminated().await)
    }

    /// An already-terminal handle.
    pub fn create_completed<T>(&self, outcome: Completed<T>) -> ExecutionHandle<T>
    where
        T: Send + 'static,
    {
        ExecutionHandle::completed(outcome)
    }

    /// Wraps `callback` so each call runs under this coordinator's primitive
    /// for `strategy`.
    pub fn wrap_with_mutex<A, R, F>(
        &self,
        callback: F,
        strategy: MutexStrategy,
    ) -> impl Fn(A) -> R + Send + Sync + 'static
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        sync::wrap_with_mutex(Arc::clone(&self.sync), callback, strategy)
    }

    pub fn sync_primitives(&self) -> &Arc<SyncPrimitives> {
        &self.sync
    }

    /// Future completing after `duration`.
    pub fn delay(&self, duration: Duration) -> Delay {
        Delay::new(&self.timer, duration)
    }

    /// Every `period`, while `condition(&payload)` holds and `cancel` is
    /// unset, runs `callback(&payload)` on the worker pool.
    ///
    /// The handle succeeds once the condition turns false.
    pub fn start_timer<P, C, F>(
        &self,
        period: Duration,
        condition: C,
        callback: F,
        payload: P,
        cancel: CancellationSignal,
    ) -> Result<ExecutionHandle<()>>
    where
        P: Send + Sync + 'static,
        C: Fn(&P) -> bool + Send + Sync + 'static,
        F: Fn(&P) + Send + Sync + 'static,
    {
        PeriodicTimer::start(
            self.timer.clone(),
            Arc::clone(&self.dispatcher.workers),
            period,
            condition,
            callback,
            payload,
            cancel,
        )
    }

    /// Stops the timer thread and both pools. Idempotent.
    pub fn shutdown(&self) {
        if self.worker_pool().is_shut_down() && self.io_pool().is_shut_down() {
            return;
        }
        tracing::info!("coordinator shutting down");
        self.timer.shutdown();
        self.dispatcher.workers.shutdown();
        self.dispatcher.io.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.worker_pool().is_shut_down()
    }

    pub(crate) fn current_limits(&self) -> PoolLimits {
        *self.limits.lock()
    }

    pub(crate) fn apply_limits(&self, limits: PoolLimits) -> Result<()> {
        limits.validate()?;
        let mut current = self.limits.lock();
        self.dispatcher
            .workers
            .set_limits(limits.min_workers, limits.max_workers)?;
        self.dispatcher.io.set_limits(limits.min_io, limits.max_io)?;
        *current = limits;
        Ok(())
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("workers", &self.dispatcher.workers)
            .field("io", &self.dispatcher.io)
            .field("timer", &self.timer)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers.name())
            .field("io", &self.io.name())
            .finish()
    }
}
