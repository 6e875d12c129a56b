//! Scoped loop driver.
//!
//! The calling thread always takes part in the loop. Extra helpers are queued
//! on the worker pool and borrow the loop state; the scope does not return
//! until every helper that started has finished, and helpers that never
//! started are revoked.

use crate::cancel::CancellationSignal;
use crate::error::{Failure, Fallible};
use crate::executor::WorkerPool;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const REVOKED: u8 = 2;

/// What a loop run observed.
#[derive(Debug, Default)]
pub(crate) struct LoopReport {
    /// The source ran dry with no stop requested
    pub exhausted: bool,
    pub canceled: bool,
    /// Failures keyed by iteration index
    pub failures: Vec<(usize, Failure)>,
}

struct Cursor<I> {
    iter: I,
    next_index: usize,
}

struct LoopState<'a, I, B> {
    source: Mutex<Option<Cursor<I>>>,
    body: &'a B,
    cancel: CancellationSignal,
    stop: AtomicBool,
    exhausted: AtomicBool,
    canceled: AtomicBool,
    failures: Mutex<Vec<(usize, Failure)>>,
}

trait Participant: Send + Sync {
    fn participate(&self);
}

impl<'a, I, B, R> LoopState<'a, I, B>
where
    I: Iterator,
    B: Fn(I::Item) -> R,
    R: Fallible,
{
    fn next_item(&self) -> Option<(usize, I::Item)> {
        if self.stop.load(Ordering::Acquire) {
            return None;
        }
        if self.cancel.is_canceled() {
            self.canceled.store(true, Ordering::Release);
            return None;
        }

        let mut source = self.source.lock();
        let cursor = source.as_mut()?;
        match cursor.iter.next() {
            Some(item) => {
                let index = cursor.next_index;
                cursor.next_index += 1;
                Some((index, item))
            }
            None => {
                self.exhausted.store(true, Ordering::Release);
                *source = None;
                None
            }
        }
    }

    fn run_loop(&self) {
        while let Some((index, item)) = self.next_item() {
            let body = self.body;
            let failure = match catch_unwind(AssertUnwindSafe(|| body(item))) {
                Ok(outcome) => outcome.into_failure(),
                Err(payload) => Some(Failure::from_panic(payload)),
            };

            if let Some(failure) = failure {
                tracing::debug!(iteration = index, %failure, "loop body failed");
                self.failures.lock().push((index, failure));
                self.stop.store(true, Ordering::Release);
            }
        }
    }
}

impl<'a, I, B, R> Participant for LoopState<'a, I, B>
where
    I: Iterator + Send,
    B: Fn(I::Item) -> R + Sync,
    R: Fallible,
{
    fn participate(&self) {
        self.run_loop();
    }
}

/// Sends on drop so a panicking helper still reports back.
struct DoneSignal(Sender<()>);

impl Drop for DoneSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// Drops the item source when the driver leaves, unwinding included.
struct SourceGuard<'g, 'a, I, B>(&'g LoopState<'a, I, B>);

impl<'g, 'a, I, B> Drop for SourceGuard<'g, 'a, I, B> {
    fn drop(&mut self) {
        self.0.source.lock().take();
    }
}

struct LoopScope<'scope> {
    tx: Sender<()>,
    rx: Receiver<()>,
    helpers: Vec<Arc<AtomicU8>>,
    _marker: PhantomData<&'scope ()>,
}

impl<'scope> LoopScope<'scope> {
    fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            helpers: Vec::new(),
            _marker: PhantomData,
        }
    }

    fn spawn_helper<P>(&mut self, pool: &WorkerPool, state: &Arc<P>) -> bool
    where
        P: Participant + 'scope,
    {
        let slot = Arc::new(AtomicU8::new(QUEUED));
        let claim = Arc::clone(&slot);
        let state = Arc::clone(state);
        let tx = self.tx.clone();

        let job: Box<dyn FnOnce() + Send + 'scope> = Box::new(move || {
            if claim
                .compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            let _done = DoneSignal(tx);
            state.participate();
        });

        // SAFETY: `LoopScope::drop` waits for every helper that moved from
        // QUEUED to RUNNING before the borrowed state goes out of scope.
        // Helpers revoked while queued return without touching the state, and
        // `SourceGuard` empties the source before the borrow ends, even when
        // the caller unwinds, so dropping their `Arc` afterwards touches no
        // borrowed data.
        let job: Box<dyn FnOnce() + Send + 'static> = unsafe { std::mem::transmute(job) };

        match pool.execute(job) {
            Ok(()) => {
                self.helpers.push(slot);
                true
            }
            Err(err) => {
                tracing::trace!(error = %err, "loop helper not queued");
                false
            }
        }
    }
}

impl<'scope> Drop for LoopScope<'scope> {
    fn drop(&mut self) {
        let mut started = 0;
        for slot in &self.helpers {
            if slot
                .compare_exchange(QUEUED, REVOKED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                started += 1;
            }
        }

        for _ in 0..started {
            let _ = self.rx.recv();
        }
    }
}

/// Runs `body` over `items` on the calling thread plus up to
/// `parallelism - 1` pool helpers.
///
/// Stops dispatching after the first failure or once `cancel` is observed;
/// items already dispatched run to completion before this returns.
pub(crate) fn drive<I, B, R>(
    pool: &WorkerPool,
    items: I,
    body: &B,
    cancel: &CancellationSignal,
    parallelism: usize,
) -> LoopReport
where
    I: Iterator + Send,
    B: Fn(I::Item) -> R + Sync,
    R: Fallible,
{
    let state = Arc::new(LoopState {
        source: Mutex::new(Some(Cursor {
            iter: items,
            next_index: 0,
        })),
        body,
        cancel: cancel.clone(),
        stop: AtomicBool::new(false),
        exhausted: AtomicBool::new(false),
        canceled: AtomicBool::new(false),
        failures: Mutex::new(Vec::new()),
    });

    // revoked helpers may still hold the state
    let source_guard = SourceGuard(&*state);
    {
        let mut scope = LoopScope::new();
        for _ in 1..parallelism {
            if !scope.spawn_helper(pool, &state) {
                break;
            }
        }
        state.participate();
    }
    drop(source_guard);

    let mut failures = std::mem::take(&mut *state.failures.lock());
    failures.sort_by_key(|(index, _)| *index);

    LoopReport {
        exhausted: state.exhausted.load(Ordering::Acquire) && failures.is_empty(),
        canceled: state.canceled.load(Ordering::Acquire),
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::atomic::AtomicUsize;

    fn pool(max: usize) -> WorkerPool {
        WorkerPool::new(&Config::default(), "loop-test", 0, max).unwrap()
    }

    #[test]
    fn test_visits_every_item_once() {
        let pool = pool(4);
        let seen = Mutex::new(Vec::new());
        let report = drive(
            &pool,
            0..500usize,
            &|i: usize| seen.lock().push(i),
            &CancellationSignal::new(),
            4,
        );

        assert!(report.exhausted);
        assert!(report.failures.is_empty());
        let mut seen = seen.into_inner();
        seen.sort_unstable();
        assert_eq!(seen, (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn test_runs_inline_without_workers() {
        let pool = pool(0);
        let count = AtomicUsize::new(0);
        let report = drive(
            &pool,
            0..10,
            &|_: i32| {
                count.fetch_add(1, Ordering::SeqCst);
            },
            &CancellationSignal::new(),
            8,
        );
        assert!(report.exhausted);
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_failure_stops_dispatch() {
        let pool = pool(2);
        let report = drive(
            &pool,
            1..=5,
            &|i: i32| if i == 2 { Err("two") } else { Ok(()) },
            &CancellationSignal::new(),
            1,
        );

        assert!(!report.exhausted);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, 1);
        assert_eq!(report.failures[0].1.message(), "two");
    }

    #[test]
    fn test_panic_is_captured() {
        let pool = pool(2);
        let report = drive(
            &pool,
            0..3,
            &|i: i32| {
                if i == 1 {
                    panic!("iteration blew up");
                }
            },
            &CancellationSignal::new(),
            1,
        );
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].1.is_panic());
    }

    #[test]
    fn test_cancel_before_start() {
        let pool = pool(2);
        let cancel = CancellationSignal::new();
        cancel.cancel();
        let count = AtomicUsize::new(0);
        let report = drive(
            &pool,
            0..10,
            &|_: i32| {
                count.fetch_add(1, Ordering::SeqCst);
            },
            &cancel,
            2,
        );
        assert!(report.canceled);
        assert!(!report.exhausted);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    struct FailingSource {
        dropped: Arc<AtomicBool>,
    }

    impl Iterator for FailingSource {
        type Item = usize;

        fn next(&mut self) -> Option<usize> {
            panic!("source failed");
        }
    }

    impl Drop for FailingSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_panicking_source_is_dropped_before_unwinding_out() {
        let pool = pool(1);
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded::<()>();
        pool.execute(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        })
        .unwrap();
        started_rx.recv().unwrap();

        // the helper stays queued behind the blocked worker
        let dropped = Arc::new(AtomicBool::new(false));
        let source = FailingSource {
            dropped: dropped.clone(),
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            drive(&pool, source, &|_: usize| (), &CancellationSignal::new(), 2)
        }));

        assert!(outcome.is_err());
        assert!(dropped.load(Ordering::SeqCst));
        release_tx.send(()).unwrap();
    }

    #[test]
    fn test_borrows_local_state() {
        let pool = pool(4);
        let data: Vec<u64> = (1..=100).collect();
        let total = std::sync::atomic::AtomicU64::new(0);
        drive(
            &pool,
            data.iter(),
            &|x: &u64| {
                total.fetch_add(*x, Ordering::SeqCst);
            },
            &CancellationSignal::new(),
            4,
        );
        assert_eq!(total.load(Ordering::SeqCst), 5050);
    }
}
