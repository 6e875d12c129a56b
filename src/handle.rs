//! Execution handles: the observable lifecycle of a unit of work.

use crate::cancel::{CallbackKey, CancellationSignal};
use crate::error::{Error, Failure, Result};
use crate::executor::{TaskId, WorkItem};
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Lifecycle state of an [`ExecutionHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TaskStatus {
    /// Created but not started
    Pending,
    /// Handed to a scheduler or executing
    Running,
    RanToCompletion,
    Faulted,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::RanToCompletion | TaskStatus::Faulted | TaskStatus::Canceled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Running => "Running",
            TaskStatus::RanToCompletion => "RanToCompletion",
            TaskStatus::Faulted => "Faulted",
            TaskStatus::Canceled => "Canceled",
        };
        f.write_str(name)
    }
}

/// Hints attached to a handle when it is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreationOptions {
    /// Run on a dedicated thread instead of occupying a pool worker.
    pub long_running: bool,
}

impl CreationOptions {
    pub fn long_running() -> Self {
        Self { long_running: true }
    }
}

/// Value for [`Coordinator::create_completed`](crate::Coordinator::create_completed).
#[derive(Debug, Clone)]
pub enum Completed<T> {
    Succeeded(T),
    Faulted(Failure),
    Canceled,
}

type TerminalCallback = Box<dyn FnOnce(TaskStatus) + Send + 'static>;

thread_local! {
    static CURRENT_TASK: Cell<Option<TaskId>> = const { Cell::new(None) };
}

/// Shared handle to an in-flight or finished unit of work.
///
/// Clones refer to the same task. Once the status is terminal it never
/// changes again.
pub struct ExecutionHandle<T> {
    inner: Arc<HandleInner<T>>,
}

struct HandleInner<T> {
    id: TaskId,
    options: CreationOptions,
    cancel: CancellationSignal,
    state: Mutex<HandleState<T>>,
    done: Condvar,
}

struct HandleState<T> {
    status: TaskStatus,
    work: Option<WorkItem<T>>,
    result: Option<T>,
    failure: Option<Failure>,
    callbacks: Vec<TerminalCallback>,
    wakers: Vec<Waker>,
    /// Callbacks this handle left on its cancellation signal
    signal_keys: Vec<CallbackKey>,
}

impl<T> Drop for HandleInner<T> {
    fn drop(&mut self) {
        for key in self.state.get_mut().signal_keys.drain(..) {
            self.cancel.remove_callback(key);
        }
    }
}

impl<T> Clone for ExecutionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> ExecutionHandle<T> {
    fn with_state(
        status: TaskStatus,
        work: Option<WorkItem<T>>,
        cancel: CancellationSignal,
        options: CreationOptions,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: TaskId::next(),
                options,
                cancel,
                state: Mutex::new(HandleState {
                    status,
                    work,
                    result: None,
                    failure: None,
                    callbacks: Vec::new(),
                    wakers: Vec::new(),
                    signal_keys: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// A not-yet-started handle. Canceled right away if `cancel` is already set.
    pub(crate) fn pending(
        work: WorkItem<T>,
        cancel: CancellationSignal,
        options: CreationOptions,
    ) -> Self {
        if cancel.is_canceled() {
            return Self::with_state(TaskStatus::Canceled, None, cancel, options);
        }
        Self::with_state(TaskStatus::Pending, Some(work), cancel, options)
    }

    /// A running handle with no work attached; completed from outside.
    pub(crate) fn detached(cancel: CancellationSignal) -> Self {
        Self::with_state(
            TaskStatus::Running,
            None,
            cancel,
            CreationOptions::default(),
        )
    }

    pub(crate) fn completed(outcome: Completed<T>) -> Self {
        let handle = Self::with_state(
            TaskStatus::Running,
            None,
            CancellationSignal::new(),
            CreationOptions::default(),
        );
        match outcome {
            Completed::Succeeded(value) => handle.finish(Ok(value)),
            Completed::Faulted(failure) => handle.finish(Err(failure)),
            Completed::Canceled => handle.finish_canceled(),
        };
        handle
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.state.lock().status
    }

    pub fn options(&self) -> CreationOptions {
        self.inner.options
    }

    pub fn cancellation(&self) -> &CancellationSignal {
        &self.inner.cancel
    }

    /// True once the handle is in any terminal state.
    pub fn is_completed(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn is_completed_successfully(&self) -> bool {
        self.status() == TaskStatus::RanToCompletion
    }

    pub fn is_faulted(&self) -> bool {
        self.status() == TaskStatus::Faulted
    }

    pub fn is_canceled(&self) -> bool {
        self.status() == TaskStatus::Canceled
    }

    pub fn failure(&self) -> Option<Failure> {
        self.inner.state.lock().failure.clone()
    }

    /// Id of the task executing on the calling thread, if any.
    pub fn current_id() -> Option<TaskId> {
        CURRENT_TASK.with(|current| current.get())
    }

    /// Blocks until the handle is terminal.
    pub fn wait(&self) -> TaskStatus {
        let mut state = self.inner.state.lock();
        while !state.status.is_terminal() {
            self.inner.done.wait(&mut state);
        }
        state.status
    }

    /// Blocks for at most `timeout`. Returns whether the handle became terminal.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !state.status.is_terminal() {
            if self.inner.done.wait_until(&mut state, deadline).timed_out() {
                return state.status.is_terminal();
            }
        }
        true
    }

    /// Timed join: waits up to `timeout` and reports whether the work finished.
    /// Nothing is interrupted when the time runs out.
    pub fn stop_after(&self, timeout: Duration) -> bool {
        self.wait_timeout(timeout)
    }

    /// Future resolving to the terminal status.
    pub fn terminated(&self) -> Terminated<T> {
        Terminated {
            handle: self.clone(),
        }
    }

    /// Pending → Running, handing out the work to execute.
    pub(crate) fn begin(&self) -> Result<WorkItem<T>> {
        let mut state = self.inner.state.lock();
        if state.status != TaskStatus::Pending {
            return Err(Error::invalid_state(format!(
                "task {} cannot start from state {}",
                self.inner.id, state.status
            )));
        }

        match state.work.take() {
            Some(work) => {
                state.status = TaskStatus::Running;
                Ok(work)
            }
            None => Err(Error::invalid_state(format!(
                "task {} has no work attached",
                self.inner.id
            ))),
        }
    }

    /// Runs `work` on the calling thread and records the outcome.
    pub(crate) fn execute(&self, work: WorkItem<T>)
    where
        T: 'static,
    {
        if self.inner.cancel.is_canceled() {
            self.finish_canceled();
            return;
        }

        let previous = CURRENT_TASK.with(|current| current.replace(Some(self.inner.id)));
        let outcome = work.run();
        CURRENT_TASK.with(|current| current.set(previous));

        if let Err(failure) = &outcome {
            tracing::debug!(task = %self.inner.id, %failure, "work item faulted");
        }
        self.finish(outcome);
    }

    /// Moves a still-pending handle to Canceled, dropping its work.
    pub(crate) fn cancel_pending(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.status != TaskStatus::Pending {
            return false;
        }
        state.work = None;
        drop(state);
        self.finish_canceled()
    }

    pub(crate) fn finish(&self, outcome: std::result::Result<T, Failure>) -> bool {
        match outcome {
            Ok(value) => self.transition(TaskStatus::RanToCompletion, Some(value), None),
            Err(failure) => self.transition(TaskStatus::Faulted, None, Some(failure)),
        }
    }

    pub(crate) fn finish_canceled(&self) -> bool {
        self.transition(TaskStatus::Canceled, None, None)
    }

    /// Sets the terminal state once; later calls are ignored.
    fn transition(&self, status: TaskStatus, result: Option<T>, failure: Option<Failure>) -> bool {
        let (callbacks, wakers, signal_keys) = {
            let mut state = self.inner.state.lock();
            if state.status.is_terminal() {
                return false;
            }
            state.status = status;
            state.result = result;
            state.failure = failure;
            state.work = None;
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.wakers),
                std::mem::take(&mut state.signal_keys),
            )
        };

        for key in signal_keys {
            self.inner.cancel.remove_callback(key);
        }

        self.inner.done.notify_all();
        for waker in wakers {
            waker.wake();
        }
        for callback in callbacks {
            callback(status);
        }
        true
    }

    /// Runs `f` once the handle's own signal is set, if the handle is still
    /// alive by then.
    pub(crate) fn on_signal<F>(&self, f: F)
    where
        T: Send + 'static,
        F: FnOnce(&ExecutionHandle<T>) + Send + 'static,
    {
        let weak: Weak<HandleInner<T>> = Arc::downgrade(&self.inner);
        let Some(key) = self.inner.cancel.on_cancel(move || {
            if let Some(inner) = weak.upgrade() {
                f(&ExecutionHandle { inner });
            }
        }) else {
            return;
        };

        let mut state = self.inner.state.lock();
        if state.status.is_terminal() {
            drop(state);
            self.inner.cancel.remove_callback(key);
        } else {
            state.signal_keys.push(key);
        }
    }

    /// Runs `f` with the terminal status, immediately if already terminal.
    pub(crate) fn on_terminal<F>(&self, f: F)
    where
        F: FnOnce(TaskStatus) + Send + 'static,
    {
        let status = {
            let mut state = self.inner.state.lock();
            if !state.status.is_terminal() {
                state.callbacks.push(Box::new(f));
                return;
            }
            state.status
        };
        f(status);
    }

    /// Snapshot used for display.
    pub fn summary(&self) -> HandleSummary {
        let state = self.inner.state.lock();
        HandleSummary {
            id: self.inner.id,
            status: state.status,
            failure: state.failure.clone(),
        }
    }
}

impl<T: Clone> ExecutionHandle<T> {
    /// The result, once the handle ran to completion.
    pub fn result(&self) -> Option<T> {
        self.inner.state.lock().result.clone()
    }

    /// Blocks until terminal, then returns the result or the failure.
    pub fn join(&self) -> Result<T> {
        self.wait();
        self.outcome()
    }

    /// Awaits the handle, then returns the result or the failure.
    pub async fn completion(&self) -> Result<T> {
        self.terminated().await;
        self.outcome()
    }

    fn outcome(&self) -> Result<T> {
        let state = self.inner.state.lock();
        match state.status {
            TaskStatus::RanToCompletion => state
                .result
                .clone()
                .ok_or_else(|| Error::invalid_state("completed task has no result")),
            TaskStatus::Faulted => Err(Error::Faulted(
                state
                    .failure
                    .clone()
                    .unwrap_or_else(|| Failure::new("unknown failure")),
            )),
            TaskStatus::Canceled => Err(Error::Canceled),
            other => Err(Error::invalid_state(format!(
                "task {} is still {}",
                self.inner.id, other
            ))),
        }
    }
}

impl<T> fmt::Debug for ExecutionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ExecutionHandle")
            .field("id", &self.inner.id)
            .field("status", &state.status)
            .field("failure", &state.failure)
            .finish()
    }
}

/// Point-in-time view of a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleSummary {
    pub id: TaskId,
    pub status: TaskStatus,
    pub failure: Option<Failure>,
}

/// Future returned by [`ExecutionHandle::terminated`].
pub struct Terminated<T> {
    handle: ExecutionHandle<T>,
}

impl<T> Future for Terminated<T> {
    type Output = TaskStatus;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<TaskStatus> {
        let mut state = self.handle.inner.state.lock();
        if state.status.is_terminal() {
            return Poll::Ready(state.status);
        }

        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T> fmt::Debug for Terminated<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminated")
            .field("task", &self.handle.id())
            .finish()
    }
}
