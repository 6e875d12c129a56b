//! Deadline scheduling: delays and periodic polling timers.

use crate::cancel::CancellationSignal;
use crate::error::{Error, Failure, Result};
use crate::executor::WorkerPool;
use crate::handle::ExecutionHandle;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Why a timer action is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerEvent {
    Elapsed,
    Shutdown,
}

type Action = Box<dyn FnOnce(TimerEvent) + Send + 'static>;

struct Entry {
    deadline: Instant,
    seq: u64,
    action: Action,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

struct TimerShared {
    queue: Mutex<BinaryHeap<Reverse<Entry>>>,
    wake: Condvar,
    shutdown: AtomicBool,
    seq: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Single thread firing actions at their deadlines.
#[derive(Clone)]
pub(crate) struct TimerService {
    shared: Arc<TimerShared>,
}

impl TimerService {
    pub(crate) fn new(thread_name: String) -> Result<Self> {
        let shared = Arc::new(TimerShared {
            queue: Mutex::new(BinaryHeap::new()),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            thread: Mutex::new(None),
        });

        let runner = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || run(runner))?;
        *shared.thread.lock() = Some(handle);

        Ok(Self { shared })
    }

    /// Queues `action` for `deadline`.
    pub(crate) fn schedule<F>(&self, deadline: Instant, action: F) -> Result<()>
    where
        F: FnOnce(TimerEvent) + Send + 'static,
    {
        let mut queue = self.shared.queue.lock();
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(Error::unavailable("timer service is shut down"));
        }
        queue.push(Reverse(Entry {
            deadline,
            seq: self.shared.seq.fetch_add(1, Ordering::Relaxed),
            action: Box::new(action),
        }));
        drop(queue);
        self.shared.wake.notify_one();
        Ok(())
    }

    pub(crate) fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Stops the thread. Queued actions receive [`TimerEvent::Shutdown`].
    pub(crate) fn shutdown(&self) {
        {
            let _queue = self.shared.queue.lock();
            if self.shared.shutdown.swap(true, Ordering::AcqRel) {
                return;
            }
        }
        self.shared.wake.notify_all();

        let handle = self.shared.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl fmt::Debug for TimerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerService")
            .field("pending", &self.pending())
            .field("shutdown", &self.shared.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

fn run(shared: Arc<TimerShared>) {
    let mut queue = shared.queue.lock();
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            let drained = std::mem::take(&mut *queue);
            drop(queue);
            for Reverse(entry) in drained.into_sorted_vec().into_iter().rev() {
                fire(entry, TimerEvent::Shutdown);
            }
            return;
        }

        let now = Instant::now();
        let next_deadline = queue.peek().map(|Reverse(entry)| entry.deadline);
        match next_deadline {
            Some(deadline) if deadline <= now => {
                if let Some(Reverse(entry)) = queue.pop() {
                    MutexGuard::unlocked(&mut queue, || fire(entry, TimerEvent::Elapsed));
                }
            }
            Some(deadline) => {
                shared.wake.wait_until(&mut queue, deadline);
            }
            None => shared.wake.wait(&mut queue),
        }
    }
}

fn fire(entry: Entry, event: TimerEvent) {
    let action = entry.action;
    if catch_unwind(AssertUnwindSafe(|| action(event))).is_err() {
        tracing::error!("timer action panicked");
    }
}

/// Future completing after a fixed duration.
///
/// Resolves early if the coordinator shuts down first.
pub struct Delay {
    state: Arc<Mutex<DelayState>>,
}

#[derive(Default)]
struct DelayState {
    elapsed: bool,
    waker: Option<Waker>,
}

impl Delay {
    pub(crate) fn new(timer: &TimerService, duration: Duration) -> Self {
        let state = Arc::new(Mutex::new(DelayState::default()));
        let target = Arc::clone(&state);
        let scheduled = timer.schedule(Instant::now() + duration, move |_| {
            let waker = {
                let mut state = target.lock();
                state.elapsed = true;
                state.waker.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        });

        if scheduled.is_err() {
            state.lock().elapsed = true;
        }
        Self { state }
    }
}

impl Future for Delay {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.state.lock();
        if state.elapsed {
            return Poll::Ready(());
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl fmt::Debug for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delay")
            .field("elapsed", &self.state.lock().elapsed)
            .finish()
    }
}

/// Recurring poll: every `period`, evaluates the condition and, while it
/// holds, hands the callback to the worker pool.
pub(crate) struct PeriodicTimer<P> {
    period: Duration,
    condition: Box<dyn Fn(&P) -> bool + Send + Sync>,
    callback: Box<dyn Fn(&P) + Send + Sync>,
    payload: P,
    cancel: CancellationSignal,
    handle: ExecutionHandle<()>,
    timer: TimerService,
    pool: Arc<WorkerPool>,
}

impl<P: Send + Sync + 'static> PeriodicTimer<P> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn start<C, F>(
        timer: TimerService,
        pool: Arc<WorkerPool>,
        period: Duration,
        condition: C,
        callback: F,
        payload: P,
        cancel: CancellationSignal,
    ) -> Result<ExecutionHandle<()>>
    where
        C: Fn(&P) -> bool + Send + Sync + 'static,
        F: Fn(&P) + Send + Sync + 'static,
    {
        if period.is_zero() {
            return Err(Error::config("timer period must be greater than zero"));
        }

        let handle = ExecutionHandle::detached(cancel.clone());
        let periodic = Arc::new(Self {
            period,
            condition: Box::new(condition),
            callback: Box::new(callback),
            payload,
            cancel: cancel.clone(),
            handle: handle.clone(),
            timer: timer.clone(),
            pool,
        });

        handle.on_signal(|timer_handle| {
            timer_handle.finish_canceled();
        });

        timer.schedule(Instant::now(), move |event| periodic.tick(event))?;
        Ok(handle)
    }

    fn tick(self: Arc<Self>, event: TimerEvent) {
        if event == TimerEvent::Shutdown || self.cancel.is_canceled() {
            self.handle.finish_canceled();
            return;
        }
        if self.handle.is_completed() {
            return;
        }

        match catch_unwind(AssertUnwindSafe(|| (self.condition)(&self.payload))) {
            Ok(true) => {}
            Ok(false) => {
                self.handle.finish(Ok(()));
                return;
            }
            Err(payload) => {
                self.handle.finish(Err(Failure::from_panic(payload)));
                return;
            }
        }

        let job = Arc::clone(&self);
        if let Err(err) = self.pool.execute(move || (job.callback)(&job.payload)) {
            tracing::warn!(error = %err, "periodic callback rejected");
            self.handle.finish(Err(Failure::from_error(&err)));
            return;
        }

        let next = Instant::now() + self.period;
        let timer = self.timer.clone();
        let periodic = Arc::clone(&self);
        if timer.schedule(next, move |event| periodic.tick(event)).is_err() {
            self.handle.finish_canceled();
        }
    }
}
