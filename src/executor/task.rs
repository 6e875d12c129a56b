//! Task representation and execution.

use crate::error::Failure;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Global task ID counter
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Internal pool job
pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) func: Box<dyn FnOnce() + Send + 'static>,
    pub(crate) spawn_time: Instant,
}

impl Task {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task {
            id: TaskId::next(),
            func: Box::new(f),
            spawn_time: Instant::now(),
        }
    }

    pub fn execute(self) {
        (self.func)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("spawn_time", &self.spawn_time)
            .finish()
    }
}

type Job<T> = Box<dyn FnOnce() -> Result<T, Failure> + Send + 'static>;

/// A unit of work: a callable, optionally bound to a payload.
///
/// Panics raised by the callable are captured as [`Failure`]s when the item
/// runs; they never unwind into the worker.
pub struct WorkItem<T> {
    job: Job<T>,
}

impl<T: 'static> WorkItem<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self {
            job: Box::new(move || Ok(f())),
        }
    }

    /// Binds a one-argument callable to the value it will receive.
    pub fn with_payload<P, F>(f: F, payload: P) -> Self
    where
        P: Send + 'static,
        F: FnOnce(P) -> T + Send + 'static,
    {
        Self {
            job: Box::new(move || Ok(f(payload))),
        }
    }

    /// Work that reports failure through its return value.
    pub fn fallible<F, E>(f: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: fmt::Display,
    {
        Self {
            job: Box::new(move || f().map_err(|e| Failure::new(e.to_string()))),
        }
    }

    pub(crate) fn run(self) -> Result<T, Failure> {
        match catch_unwind(AssertUnwindSafe(self.job)) {
            Ok(outcome) => outcome,
            Err(payload) => Err(Failure::from_panic(payload)),
        }
    }
}

impl<T> fmt::Debug for WorkItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_are_unique() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_work_item_with_payload() {
        let item = WorkItem::with_payload(|x: i32| x * 2, 21);
        assert_eq!(item.run().unwrap(), 42);
    }

    #[test]
    fn test_work_item_captures_panic() {
        let item: WorkItem<()> = WorkItem::new(|| panic!("exploded"));
        let failure = item.run().unwrap_err();
        assert!(failure.is_panic());
        assert_eq!(failure.message(), "exploded");
    }

    #[test]
    fn test_fallible_work_item() {
        let item: WorkItem<u8> = WorkItem::fallible(|| Err::<u8, _>("nope"));
        let failure = item.run().unwrap_err();
        assert!(!failure.is_panic());
        assert_eq!(failure.message(), "nope");
    }
}
