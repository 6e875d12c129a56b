use super::scope::{drive, LoopReport};
use crate::cancel::CancellationSignal;
use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

type Stage<'c, T, U> = Arc<dyn Fn(T) -> Option<U> + Send + Sync + 'c>;

/// Lazy parallel query.
///
/// `map` and `filter` only compose stages; the source is consumed by the
/// terminal operations, which run the stages on the caller and the worker
/// pool. Ordered queries return results in source order.
pub struct ParallelQuery<'c, T, U> {
    coordinator: &'c Coordinator,
    source: Box<dyn Iterator<Item = T> + Send + 'c>,
    stage: Stage<'c, T, U>,
    cancel: CancellationSignal,
    ordered: bool,
    max_parallelism: Option<usize>,
}

impl<'c, T: Send + 'c> ParallelQuery<'c, T, T> {
    pub(crate) fn new(
        coordinator: &'c Coordinator,
        source: Box<dyn Iterator<Item = T> + Send + 'c>,
        cancel: CancellationSignal,
        ordered: bool,
    ) -> Self {
        Self {
            coordinator,
            source,
            stage: Arc::new(Some),
            cancel,
            ordered,
            max_parallelism: None,
        }
    }
}

impl<'c, T, U> ParallelQuery<'c, T, U>
where
    T: Send + 'c,
    U: Send + 'c,
{
    pub fn map<V, F>(self, f: F) -> ParallelQuery<'c, T, V>
    where
        F: Fn(U) -> V + Send + Sync + 'c,
        V: Send + 'c,
    {
        let prev = self.stage;
        ParallelQuery {
            coordinator: self.coordinator,
            source: self.source,
            stage: Arc::new(move |item| prev(item).map(&f)),
            cancel: self.cancel,
            ordered: self.ordered,
            max_parallelism: self.max_parallelism,
        }
    }

    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&U) -> bool + Send + Sync + 'c,
    {
        let prev = self.stage;
        Self {
            stage: Arc::new(move |item| prev(item).filter(|value| predicate(value))),
            ..self
        }
    }

    pub fn with_max_parallelism(mut self, n: usize) -> Self {
        self.max_parallelism = Some(n);
        self
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Evaluates the query into a vector.
    pub fn collect(self) -> Result<Vec<U>> {
        let ordered = self.ordered;
        let results = Mutex::new(Vec::new());
        let stage = Arc::clone(&self.stage);

        self.run(|(index, item): (usize, T)| {
            if let Some(value) = stage(item) {
                results.lock().push((index, value));
            }
        })?;

        let mut results = results.into_inner();
        if ordered {
            results.sort_by_key(|(index, _)| *index);
        }
        Ok(results.into_iter().map(|(_, value)| value).collect())
    }

    /// Number of items surviving every stage.
    pub fn count(self) -> Result<usize> {
        let count = std::sync::atomic::AtomicUsize::new(0);
        let stage = Arc::clone(&self.stage);

        self.run(|(_, item): (usize, T)| {
            if stage(item).is_some() {
                count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        })?;
        Ok(count.into_inner())
    }

    /// Runs `f` on every result, in no particular order.
    pub fn for_each<F>(self, f: F) -> Result<()>
    where
        F: Fn(U) + Sync,
    {
        let stage = Arc::clone(&self.stage);
        self.run(|(_, item): (usize, T)| {
            if let Some(value) = stage(item) {
                f(value);
            }
        })
    }

    fn run<B>(self, body: B) -> Result<()>
    where
        B: Fn((usize, T)) + Sync,
    {
        self.cancel.check()?;
        let degree = match self.max_parallelism {
            Some(0) => return Err(Error::config("max_parallelism must be at least 1")),
            Some(n) => n,
            None => num_cpus::get().max(1),
        };

        let report: LoopReport = drive(
            self.coordinator.worker_pool(),
            self.source.enumerate(),
            &body,
            &self.cancel,
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
}

impl<T, U> fmt::Debug for ParallelQuery<'_, T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelQuery")
            .field("ordered", &self.ordered)
            .field("max_parallelism", &self.max_parallelism)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::cancel::CancellationSignal;
    use crate::config::Config;
    use crate::coordinator::Coordinator;
    use crate::error::Error;

    fn coordinator() -> Coordinator {
        Coordinator::new(Config::builder().workers(1, 4).build().unwrap()).unwrap()
    }

    #[test]
    fn test_ordered_query_preserves_order() {
        let coordinator = coordinator();
        let squares = coordinator
            .parallel_query(0..200u64, CancellationSignal::new(), true)
            .filter(|x| x % 2 == 0)
            .map(|x| x * x)
            .collect()
            .unwrap();

        let expected: Vec<u64> = (0..200u64).filter(|x| x % 2 == 0).map(|x| x * x).collect();
        assert_eq!(squares, expected);
    }

    #[test]
    fn test_unordered_query_has_same_elements() {
        let coordinator = coordinator();
        let mut values = coordinator
            .parallel_query(vec!["a", "bb", "ccc"], CancellationSignal::new(), false)
            .map(str::len)
            .collect()
            .unwrap();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_count_and_for_each() {
        let coordinator = coordinator();
        let count = coordinator
            .parallel_query(1..=100, CancellationSignal::new(), false)
            .filter(|x| x % 10 == 0)
            .count()
            .unwrap();
        assert_eq!(count, 10);

        let sum = std::sync::atomic::AtomicI32::new(0);
        coordinator
            .parallel_query(1..=10, CancellationSignal::new(), false)
            .for_each(|x| {
                sum.fetch_add(x, std::sync::atomic::Ordering::Relaxed);
            })
            .unwrap();
        assert_eq!(sum.into_inner(), 55);
    }

    #[test]
    fn test_canceled_query() {
        let coordinator = coordinator();
        let cancel = CancellationSignal::new();
        cancel.cancel();
        let result = coordinator.parallel_query(0..10, cancel, true).collect();
        assert!(matches!(result, Err(Error::Canceled)));
    }

    #[test]
    fn test_panicking_stage_is_aggregated() {
        let coordinator = coordinator();
        let result = coordinator
            .parallel_query(0..10, CancellationSignal::new(), true)
            .with_max_parallelism(1)
            .map(|x: i32| if x == 4 { panic!("stage failed") } else { x })
            .collect();
        assert!(matches!(result, Err(Error::Aggregate(f)) if f[0].is_panic()));
    }
}
