//! Containment of panics escaping pool jobs.

use crate::error::Failure;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// What a pool does when a submitted job panics.
///
/// Work submitted through handles records its own panics as faults before
/// they reach the pool; this only governs raw closures given to
/// [`WorkerPool::execute`](super::WorkerPool::execute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanicStrategy {
    /// Log at error level and abort the process
    Abort,
    /// Swallow silently; the worker keeps running
    Isolate,
    /// Log a warning; the worker keeps running
    #[default]
    LogAndContinue,
}

/// Runs jobs for one pool under its [`PanicStrategy`].
#[derive(Debug)]
pub struct PanicHandler {
    pool: String,
    strategy: PanicStrategy,
}

impl PanicHandler {
    pub fn new(pool: impl Into<String>, strategy: PanicStrategy) -> Self {
        Self {
            pool: pool.into(),
            strategy,
        }
    }

    /// Runs `job`, turning an escaping panic into a [`Failure`].
    pub fn contain<F, R>(&self, job: F) -> Result<R, Failure>
    where
        F: FnOnce() -> R,
    {
        catch_unwind(AssertUnwindSafe(job)).map_err(|payload| {
            let failure = Failure::from_panic(payload);
            self.react(&failure);
            failure
        })
    }

    fn react(&self, failure: &Failure) {
        match self.strategy {
            PanicStrategy::Isolate => {}
            PanicStrategy::LogAndContinue => {
                tracing::warn!(pool = %self.pool, panic = failure.message(), "pool job panicked");
            }
            PanicStrategy::Abort => {
                tracing::error!(pool = %self.pool, panic = failure.message(), "pool job panicked, aborting");
                std::process::abort();
            }
        }
    }

    pub fn strategy(&self) -> PanicStrategy {
        self.strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contain_returns_failure() {
        let handler = PanicHandler::new("test", PanicStrategy::Isolate);
        let failure = handler.contain(|| panic!("lost connection")).unwrap_err();

        assert!(failure.is_panic());
        assert_eq!(failure.message(), "lost connection");
    }

    #[test]
    fn test_contain_passes_value_through() {
        let handler = PanicHandler::new("test", PanicStrategy::LogAndContinue);
        assert_eq!(handler.contain(|| "ok").unwrap(), "ok");
        assert_eq!(handler.strategy(), PanicStrategy::LogAndContinue);
    }

    #[test]
    fn test_formatted_panic_message() {
        let handler = PanicHandler::new("test", PanicStrategy::LogAndContinue);
        let id = 7;
        let failure = handler.contain(|| panic!("job {id} failed")).unwrap_err();
        assert_eq!(failure.message(), "job 7 failed");
    }
}
