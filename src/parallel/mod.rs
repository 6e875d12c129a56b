//! Cancellable parallel loops and queries.

mod query;
mod scope;

pub use query::ParallelQuery;

use crate::cancel::CancellationSignal;
use crate::coordinator::Coordinator;
use crate::error::{Error, Failure, Fallible, Result};
use scope::{drive, LoopReport};

/// Knobs for a parallel loop.
#[derive(Debug, Clone, Default)]
pub struct LoopOptions {
    pub cancel: CancellationSignal,
    /// Upper bound on concurrent participants, the caller included.
    /// Defaults to the number of CPUs.
    pub max_parallelism: Option<usize>,
    /// Report body failures through [`LoopOutcome`] instead of `Err`.
    pub observe_loop_state: bool,
}

impl LoopOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(mut self, cancel: CancellationSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn max_parallelism(mut self, n: usize) -> Self {
        self.max_parallelism = Some(n);
        self
    }

    pub fn observe_loop_state(mut self, observe: bool) -> Self {
        self.observe_loop_state = observe;
        self
    }

    pub(crate) fn degree(&self) -> Result<usize> {
        match self.max_parallelism {
            Some(0) => Err(Error::config("max_parallelism must be at least 1")),
            Some(n) => Ok(n),
            None => Ok(num_cpus::get().max(1)),
        }
    }
}

/// How a loop ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopOutcome {
    completed: bool,
    canceled: bool,
    failures: Vec<Failure>,
    lowest_failed_iteration: Option<usize>,
}

impl LoopOutcome {
    fn from_report(report: LoopReport) -> Self {
        Self {
            completed: report.exhausted,
            canceled: report.canceled,
            lowest_failed_iteration: report.failures.first().map(|(index, _)| *index),
            failures: report.failures.into_iter().map(|(_, f)| f).collect(),
        }
    }

    /// True when every item ran and none failed.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn was_canceled(&self) -> bool {
        self.canceled
    }

    /// Failures suppressed by `observe_loop_state`, by iteration order.
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn lowest_failed_iteration(&self) -> Option<usize> {
        self.lowest_failed_iteration
    }
}

fn into_outcome(report: LoopReport, observe: bool) -> Result<LoopOutcome> {
    if !observe && !report.failures.is_empty() {
        return Err(Error::Aggregate(
            report.failures.into_iter().map(|(_, f)| f).collect(),
        ));
    }
    Ok(LoopOutcome::from_report(report))
}

impl Coordinator {
    /// Runs `body` once per item, spreading items over the caller and the
    /// worker pool.
    ///
    /// Dispatch stops at the first failure or when the options' signal is
    /// observed; the returned outcome then reports `is_completed() == false`.
    pub fn parallel_for_each<I, B, R>(
        &self,
        items: I,
        body: B,
        options: &LoopOptions,
    ) -> Result<LoopOutcome>
    where
        I: IntoIterator,
        I::IntoIter: Send,
        B: Fn(I::Item) -> R + Sync,
        R: Fallible,
    {
        let degree = options.degree()?;
        let report = drive(
            self.worker_pool(),
            items.into_iter(),
            &body,
            &options.cancel,
            degree,
        );

        tracing::trace!(
            completed = report.exhausted,
            failures = report.failures.len(),
            "parallel_for_each finished"
        );
        into_outcome(report, options.observe_loop_state)
    }

    /// [`parallel_for_each`](Self::parallel_for_each) over `start..end_exclusive`.
    pub fn parallel_for<B, R>(
        &self,
        start: i64,
        end_exclusive: i64,
        body: B,
        options: &LoopOptions,
    ) -> Result<LoopOutcome>
    where
        B: Fn(i64) -> R + Sync,
        R: Fallible,
    {
        self.parallel_for_each(start..end_exclusive, body, options)
    }

    /// Runs every action, stopping dispatch at the first failure.
    ///
    /// Returns `Err(Aggregate)` with all failures, or `Err(Canceled)` when the
    /// signal cut the run short.
    pub fn parallel_invoke<I, F, R>(&self, actions: I, options: &LoopOptions) -> Result<()>
    where
        I: IntoIterator<Item = F>,
        I::IntoIter: Send,
        F: FnOnce() -> R,
        R: Fallible,
    {
        options.cancel.check()?;
        let degree = options.degree()?;
        let report = drive(
            self.worker_pool(),
            actions.into_iter(),
            &|action: F| action(),
            &options.cancel,
            degree,
        );

        if !report.failures.is_empty() {
            return Err(Error::Aggregate(
                report.failures.into_iter().map(|(_, f)| f).collect(),
            ));
        }
        if !report.exhausted {
            return Err(Error::Canceled);
        }
        Ok(())
    }

    /// Starts a lazy query over `source`; nothing runs until a terminal
    /// operation is called.
    pub fn parallel_query<'c, I>(
        &'c self,
        source: I,
        cancel: CancellationSignal,
        ordered: bool,
    ) -> ParallelQuery<'c, I::Item, I::Item>
    where
        I: IntoIterator,
        I::IntoIter: Send + 'c,
        I::Item: Send + 'c,
    {
        ParallelQuery::new(self, Box::new(source.into_iter()), cancel, ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator() -> Coordinator {
        Coordinator::new(Config::builder().workers(1, 4).build().unwrap()).unwrap()
    }

    #[test]
    fn test_zero_parallelism_is_rejected() {
        let coordinator = coordinator();
        let options = LoopOptions::new().max_parallelism(0);
        let result = coordinator.parallel_for(0, 10, |_| {}, &options);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_parallel_for_sums_range() {
        let coordinator = coordinator();
        let total = AtomicUsize::new(0);
        let outcome = coordinator
            .parallel_for(
                0,
                1000,
                |i| {
                    total.fetch_add(i as usize, Ordering::Relaxed);
                },
                &LoopOptions::new(),
            )
            .unwrap();

        assert!(outcome.is_completed());
        assert_eq!(total.load(Ordering::Relaxed), 499_500);
    }

    #[test]
    fn test_empty_range_completes() {
        let coordinator = coordinator();
        let outcome = coordinator
            .parallel_for(5, 5, |_| -> () { panic!("never runs") }, &LoopOptions::new())
            .unwrap();
        assert!(outcome.is_completed());
    }

    #[test]
    fn test_failure_without_observe_is_aggregate() {
        let coordinator = coordinator();
        let result = coordinator.parallel_for_each(
            vec![1, 2, 3],
            |x: i32| if x == 2 { Err(format!("bad {x}")) } else { Ok(()) },
            &LoopOptions::new().max_parallelism(1),
        );

        match result {
            Err(Error::Aggregate(failures)) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].message(), "bad 2");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_observed_failure_stops_early() {
        let coordinator = coordinator();
        let visited = Mutex::new(Vec::new());
        let outcome = coordinator
            .parallel_for_each(
                vec![1, 2, 3, 4, 5],
                |x: i32| {
                    visited.lock().push(x);
                    if x == 3 {
                        Err("three")
                    } else {
                        Ok(())
                    }
                },
                &LoopOptions::new().max_parallelism(1).observe_loop_state(true),
            )
            .unwrap();

        assert!(!outcome.is_completed());
        assert_eq!(outcome.failures().len(), 1);
        assert_eq!(outcome.lowest_failed_iteration(), Some(2));
        assert_eq!(*visited.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_cancel_mid_loop() {
        let coordinator = coordinator();
        let cancel = CancellationSignal::new();
        let runs = AtomicUsize::new(0);
        let outcome = coordinator
            .parallel_for(
                0,
                100,
                |i| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    if i == 10 {
                        cancel.cancel();
                    }
                },
                &LoopOptions::new().cancel(cancel.clone()).max_parallelism(1),
            )
            .unwrap();

        assert!(!outcome.is_completed());
        assert!(outcome.was_canceled());
        assert_eq!(runs.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_parallel_invoke_runs_all() {
        let coordinator = coordinator();
        let count = AtomicUsize::new(0);
        let actions: Vec<Box<dyn FnOnce() + Send + '_>> = (0..8)
            .map(|_| {
                Box::new(|| {
                    count.fetch_add(1, Ordering::SeqCst);
                }) as Box<dyn FnOnce() + Send + '_>
            })
            .collect();

        coordinator.parallel_invoke(actions, &LoopOptions::new()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_parallel_invoke_aggregates() {
        let coordinator = coordinator();
        let actions: Vec<Box<dyn FnOnce() -> std::result::Result<(), String> + Send>> = vec![
            Box::new(|| Ok(())),
            Box::new(|| Err("first".to_string())),
        ];
        let result = coordinator.parallel_invoke(actions, &LoopOptions::new().max_parallelism(1));
        assert!(matches!(result, Err(Error::Aggregate(f)) if f.len() == 1));
    }

    #[test]
    fn test_parallel_invoke_canceled_up_front() {
        let coordinator = coordinator();
        let cancel = CancellationSignal::new();
        cancel.cancel();
        let actions: Vec<fn()> = vec![|| {}];
        let result = coordinator.parallel_invoke(actions, &LoopOptions::new().cancel(cancel));
        assert!(matches!(result, Err(Error::Canceled)));
    }
}
