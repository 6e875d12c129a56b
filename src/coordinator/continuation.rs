use super::{Coordinator, Dispatcher, SchedulerHint};
use crate::cancel::CancellationSignal;
use crate::error::{Error, Failure, Result};
use crate::executor::WorkItem;
use crate::handle::{CreationOptions, ExecutionHandle, TaskStatus};
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Which antecedent outcomes let a continuation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RunOn {
    #[default]
    Any,
    OnlyOnSuccess,
    OnlyOnFaulted,
    OnlyOnCanceled,
    NotOnSuccess,
    NotOnFaulted,
    NotOnCanceled,
}

impl RunOn {
    pub fn admits(self, status: TaskStatus) -> bool {
        match self {
            RunOn::Any => true,
            RunOn::OnlyOnSuccess => status == TaskStatus::RanToCompletion,
            RunOn::OnlyOnFaulted => status == TaskStatus::Faulted,
            RunOn::OnlyOnCanceled => status == TaskStatus::Canceled,
            RunOn::NotOnSuccess => status != TaskStatus::RanToCompletion,
            RunOn::NotOnFaulted => status != TaskStatus::Faulted,
            RunOn::NotOnCanceled => status != TaskStatus::Canceled,
        }
    }
}

/// Continuation behavior.
///
/// A continuation rejected by `run_on` ends Canceled without running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContinuationOptions {
    pub run_on: RunOn,
    /// Run inline on the thread that completed the antecedent.
    pub execute_synchronously: bool,
    pub long_running: bool,
}

impl ContinuationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_on(mut self, run_on: RunOn) -> Self {
        self.run_on = run_on;
        self
    }

    pub fn execute_synchronously(mut self) -> Self {
        self.execute_synchronously = true;
        self
    }

    pub fn long_running(mut self) -> Self {
        self.long_running = true;
        self
    }

    fn creation(self) -> CreationOptions {
        CreationOptions {
            long_running: self.long_running,
        }
    }
}

/// How [`Coordinator::wait`] blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WaitMode {
    /// Drive the handles' completion futures.
    CooperativeAwait,
    /// Park the thread on each handle in turn.
    #[default]
    BlockingJoin,
}

/// Combined status used to filter multi-antecedent continuations.
fn combined_status<T>(handles: &[ExecutionHandle<T>]) -> TaskStatus {
    let statuses: Vec<_> = handles.iter().map(ExecutionHandle::status).collect();
    if statuses.contains(&TaskStatus::Faulted) {
        TaskStatus::Faulted
    } else if statuses.contains(&TaskStatus::Canceled) {
        TaskStatus::Canceled
    } else {
        TaskStatus::RanToCompletion
    }
}

/// `Ok`, every failure as `Aggregate`, or `Canceled`.
fn settle<T>(handles: &[ExecutionHandle<T>]) -> Result<()> {
    let failures: Vec<Failure> = handles.iter().filter_map(ExecutionHandle::failure).collect();
    if !failures.is_empty() {
        return Err(Error::Aggregate(failures));
    }
    if handles.iter().any(ExecutionHandle::is_canceled) {
        return Err(Error::Canceled);
    }
    Ok(())
}

fn schedule<U>(
    dispatcher: &Dispatcher,
    continuation: &ExecutionHandle<U>,
    admitted: bool,
    options: ContinuationOptions,
    hint: SchedulerHint,
) where
    U: Send + 'static,
{
    if !admitted {
        continuation.cancel_pending();
        return;
    }

    let hint = if options.execute_synchronously {
        SchedulerHint::CurrentThread
    } else {
        hint
    };
    if let Err(err) = dispatcher.dispatch(continuation, hint) {
        tracing::debug!(task = %continuation.id(), error = %err, "continuation not started");
    }
}

impl Coordinator {
    fn pending_continuation<U>(
        &self,
        work: WorkItem<U>,
        cancel: CancellationSignal,
        options: ContinuationOptions,
    ) -> ExecutionHandle<U>
    where
        U: Send + 'static,
    {
        let continuation = ExecutionHandle::pending(work, cancel, options.creation());
        continuation.on_signal(|pending| {
            pending.cancel_pending();
        });
        continuation
    }

    /// Runs `action(&antecedent, param)` once `antecedent` is terminal.
    pub fn continue_with<T, U, P, F>(
        &self,
        antecedent: &ExecutionHandle<T>,
        action: F,
        param: P,
        cancel: CancellationSignal,
        options: ContinuationOptions,
        hint: SchedulerHint,
    ) -> ExecutionHandle<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        P: Send + 'static,
        F: FnOnce(&ExecutionHandle<T>, P) -> U + Send + 'static,
    {
        let prior = antecedent.clone();
        let continuation = self.pending_continuation(
            WorkItem::new(move || action(&prior, param)),
            cancel,
            options,
        );

        let dispatcher = self.dispatcher.clone();
        let next = continuation.clone();
        antecedent.on_terminal(move |status| {
            schedule(&dispatcher, &next, options.run_on.admits(status), options, hint);
        });
        continuation
    }

    /// Runs `action(&winner)` once the first of `handles` is terminal.
    pub fn continue_when_any<T, U, F>(
        &self,
        handles: &[ExecutionHandle<T>],
        action: F,
        cancel: CancellationSignal,
        options: ContinuationOptions,
        hint: SchedulerHint,
    ) -> Result<ExecutionHandle<U>>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce(&ExecutionHandle<T>) -> U + Send + 'static,
    {
        if handles.is_empty() {
            return Err(Error::invalid_state("continue_when_any needs at least one handle"));
        }

        let winner: Arc<Mutex<Option<ExecutionHandle<T>>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&winner);
        let continuation = self.pending_continuation(
            WorkItem::fallible(move || {
                let winner = slot.lock().take().ok_or("no antecedent finished")?;
                Ok::<U, &str>(action(&winner))
            }),
            cancel,
            options,
        );

        let fired = Arc::new(AtomicBool::new(false));
        for handle in handles {
            let dispatcher = self.dispatcher.clone();
            let next = continuation.clone();
            let fired = Arc::clone(&fired);
            let winner = Arc::clone(&winner);
            let candidate = handle.clone();
            handle.on_terminal(move |status| {
                if fired.swap(true, Ordering::AcqRel) {
                    return;
                }
                *winner.lock() = Some(candidate);
                schedule(&dispatcher, &next, options.run_on.admits(status), options, hint);
            });
        }
        Ok(continuation)
    }

    /// Runs `action(handles)` once every handle is terminal.
    ///
    /// `run_on` is checked against the combined outcome: Faulted if any
    /// faulted, else Canceled if any was canceled, else RanToCompletion.
    pub fn continue_when_all<T, U, F>(
        &self,
        handles: &[ExecutionHandle<T>],
        action: F,
        cancel: CancellationSignal,
        options: ContinuationOptions,
        hint: SchedulerHint,
    ) -> Result<ExecutionHandle<U>>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce(&[ExecutionHandle<T>]) -> U + Send + 'static,
    {
        if handles.is_empty() {
            return Err(Error::invalid_state("continue_when_all needs at least one handle"));
        }

        let all: Arc<[ExecutionHandle<T>]> = handles.into();
        let antecedents = Arc::clone(&all);
        let continuation = self.pending_continuation(
            WorkItem::new(move || action(&antecedents)),
            cancel,
            options,
        );

        let remaining = Arc::new(AtomicUsize::new(handles.len()));
        for handle in handles {
            let dispatcher = self.dispatcher.clone();
            let next = continuation.clone();
            let remaining = Arc::clone(&remaining);
            let all = Arc::clone(&all);
            handle.on_terminal(move |_| {
                if remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
                    return;
                }
                let admitted = options.run_on.admits(combined_status(&all));
                schedule(&dispatcher, &next, admitted, options, hint);
            });
        }
        Ok(continuation)
    }

    /// Blocks until every handle is terminal.
    ///
    /// Returns `Err(Aggregate)` with every failure if any faulted, otherwise
    /// `Err(Canceled)` if any was canceled.
    pub fn wait<T>(&self, handles: &[ExecutionHandle<T>], mode: WaitMode) -> Result<()> {
        match mode {
            WaitMode::BlockingJoin => {
                for handle in handles {
                    handle.wait();
                }
            }
            WaitMode::CooperativeAwait => {
                futures::executor::block_on(join_all(handles.iter().map(ExecutionHandle::terminated)));
            }
        }
        settle(handles)
    }

    /// [`wait`](Self::wait) bounded by `timeout`.
    pub fn wait_timeout<T>(&self, handles: &[ExecutionHandle<T>], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        for handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !handle.wait_timeout(remaining) {
                return Err(Error::Timeout(timeout));
            }
        }
        settle(handles)
    }

    /// Async counterpart of [`wait`](Self::wait).
    pub async fn when_all<T>(&self, handles: &[ExecutionHandle<T>]) -> Result<()> {
        join_all(handles.iter().map(ExecutionHandle::terminated)).await;
        settle(handles)
    }
}
