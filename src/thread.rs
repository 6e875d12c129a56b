//! Dedicated threads outside the pools.

use crate::error::{Error, Failure, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

#[cfg(target_os = "linux")]
pub(crate) fn pin_thread_to_core(core_id: usize) -> bool {
    unsafe {
        let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(core_id, &mut cpuset);
        let result = libc::sched_setaffinity(
            0, // current thread
            std::mem::size_of::<libc::cpu_set_t>(),
            &cpuset,
        );
        if result != 0 {
            tracing::warn!(
                thread = thread::current().name().unwrap_or("unknown"),
                core = core_id,
                "failed to pin thread"
            );
            return false;
        }
        true
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn pin_thread_to_core(_core_id: usize) -> bool {
    false
}

/// Processor the calling thread is running on, where the platform reports it.
pub fn current_processor_id() -> Option<usize> {
    #[cfg(target_os = "linux")]
    {
        let cpu = unsafe { libc::sched_getcpu() };
        usize::try_from(cpu).ok()
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Busy-waits for roughly `iterations` spin-loop hints.
pub fn spin_wait(iterations: u32) {
    crate::util::spin_wait(iterations);
}

/// How to build a dedicated thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadSpec {
    name: Option<String>,
    stack_size: Option<usize>,
    core: Option<usize>,
}

impl ThreadSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Best effort; ignored where affinity is unsupported.
    pub fn pin_to_core(mut self, core: usize) -> Self {
        self.core = Some(core);
        self
    }
}

/// Identity of a thread at the time it was described.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub name: Option<String>,
    pub id: ThreadId,
    pub processor: Option<usize>,
}

impl ThreadInfo {
    pub fn of_current() -> Self {
        let current = thread::current();
        Self {
            name: current.name().map(str::to_owned),
            id: current.id(),
            processor: current_processor_id(),
        }
    }
}

impl fmt::Display for ThreadInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name.as_deref().unwrap_or("<unnamed>"))?;
        write!(f, " ({:?})", self.id)?;
        if let Some(cpu) = self.processor {
            write!(f, " on cpu {cpu}")?;
        }
        Ok(())
    }
}

pub fn current_thread_info() -> ThreadInfo {
    ThreadInfo::of_current()
}

/// Join handle for a thread started with [`spawn_thread`].
pub struct ThreadHandle {
    name: Option<String>,
    id: ThreadId,
    done: Receiver<()>,
    join: Option<JoinHandle<()>>,
    failure: Arc<Mutex<Option<Failure>>>,
}

impl ThreadHandle {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.done.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        )
    }

    /// Waits at most `timeout` for the thread to end.
    ///
    /// Returns `false` if it is still running; the thread is left alone.
    pub fn stop_after(&mut self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(join) = self.join.take() {
                    let _ = join.join();
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// Blocks until the thread ends. A panic in the action is returned as
    /// [`Error::Faulted`].
    pub fn join(mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        match self.failure.lock().take() {
            Some(failure) => Err(Error::Faulted(failure)),
            None => Ok(()),
        }
    }

    pub fn failure(&self) -> Option<Failure> {
        self.failure.lock().clone()
    }
}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Starts `action(payload)` on a new thread described by `spec`.
pub fn spawn_thread<P, F>(spec: ThreadSpec, action: F, payload: P) -> Result<ThreadHandle>
where
    P: Send + 'static,
    F: FnOnce(P) + Send + 'static,
{
    let (done_tx, done_rx) = bounded::<()>(0);
    let failure = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&failure);
    let core = spec.core;

    let mut builder = thread::Builder::new();
    if let Some(name) = &spec.name {
        builder = builder.name(name.clone());
    }
    if let Some(size) = spec.stack_size {
        builder = builder.stack_size(size);
    }

    let join = builder.spawn(move || {
        // dropped on exit, which disconnects the handle's receiver
        let _done = done_tx;
        if let Some(core) = core {
            pin_thread_to_core(core);
        }
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| action(payload))) {
            let failure = Failure::from_panic(payload);
            tracing::warn!(%failure, "dedicated thread panicked");
            *slot.lock() = Some(failure);
        }
    })?;

    tracing::trace!(name = ?spec.name, "dedicated thread started");
    Ok(ThreadHandle {
        name: spec.name,
        id: join.thread().id(),
        done: done_rx,
        join: Some(join),
        failure,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_spawn_thread_passes_payload() {
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let handle = spawn_thread(
            ThreadSpec::new().name("payload-thread"),
            move |n: usize| {
                s.store(n, Ordering::SeqCst);
            },
            17,
        )
        .unwrap();

        assert_eq!(handle.name(), Some("payload-thread"));
        handle.join().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 17);
    }

    #[test]
    fn test_stop_after_reports_running_thread() {
        let (release_tx, release_rx) = bounded::<()>(0);
        let mut handle = spawn_thread(
            ThreadSpec::new(),
            move |rx: Receiver<()>| {
                let _ = rx.recv();
            },
            release_rx,
        )
        .unwrap();

        assert!(!handle.stop_after(Duration::from_millis(20)));
        assert!(!handle.is_finished());

        release_tx.send(()).unwrap();
        assert!(handle.stop_after(Duration::from_secs(5)));
        assert!(handle.is_finished());
    }

    #[test]
    fn test_panicking_thread_reports_failure() {
        let handle = spawn_thread(ThreadSpec::new(), |_: ()| panic!("thread boom"), ()).unwrap();
        match handle.join() {
            Err(Error::Faulted(failure)) => {
                assert!(failure.is_panic());
                assert!(failure.message().contains("thread boom"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_current_thread_info() {
        let info = thread::Builder::new()
            .name("info-reader".into())
            .spawn(current_thread_info)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(info.name.as_deref(), Some("info-reader"));
        assert!(info.to_string().starts_with("info-reader"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_processor_id_available_on_linux() {
        assert!(current_processor_id().is_some());
    }
}
