//! Mutual-exclusion strategies for wrapping callbacks.
//!
//! The coordinator owns one primitive per [`MutexStrategy`]. Every callback
//! wrapped with the same strategy shares that primitive, so bodies guarded by
//! the same strategy never overlap.

use parking_lot::{Condvar, Mutex, ReentrantMutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Which shared primitive serializes a wrapped callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MutexStrategy {
    /// Reentrant exclusive lock; the owning thread may enter again.
    ExclusiveLock,
    /// Plain non-reentrant mutex.
    Mutex,
    /// Auto-reset event, initially signaled. Waiting consumes the signal.
    ManualSignal,
    /// Semaphore with a single permit.
    CountingPermit,
}

/// Event that lets exactly one waiter through per `set`.
pub struct AutoResetEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl AutoResetEvent {
    pub fn new(initially_set: bool) -> Self {
        Self {
            signaled: Mutex::new(initially_set),
            cond: Condvar::new(),
        }
    }

    /// Blocks until signaled, then resets the signal.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
        *signaled = false;
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() && !*signaled {
                return false;
            }
        }
        *signaled = false;
        true
    }

    pub fn set(&self) {
        *self.signaled.lock() = true;
        self.cond.notify_one();
    }

    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }
}

impl fmt::Debug for AutoResetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoResetEvent")
            .field("signaled", &self.is_set())
            .finish()
    }
}

/// Counting semaphore.
pub struct Semaphore {
    permits: Mutex<usize>,
    max: usize,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize, max: usize) -> Self {
        Self {
            permits: Mutex::new(initial.min(max)),
            max,
            cond: Condvar::new(),
        }
    }

    pub fn acquire(&self) -> SemaphoreGuard<'_> {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.cond.wait(&mut permits);
        }
        *permits -= 1;
        SemaphoreGuard { semaphore: self }
    }

    pub fn try_acquire(&self) -> Option<SemaphoreGuard<'_>> {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return None;
        }
        *permits -= 1;
        Some(SemaphoreGuard { semaphore: self })
    }

    pub fn available(&self) -> usize {
        *self.permits.lock()
    }

    fn release(&self) {
        let mut permits = self.permits.lock();
        if *permits < self.max {
            *permits += 1;
        }
        drop(permits);
        self.cond.notify_one();
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("available", &self.available())
            .field("max", &self.max)
            .finish()
    }
}

/// Returns the permit on drop.
pub struct SemaphoreGuard<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

impl fmt::Debug for SemaphoreGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemaphoreGuard").finish_non_exhaustive()
    }
}

struct SignalGuard<'a>(&'a AutoResetEvent);

impl Drop for SignalGuard<'_> {
    fn drop(&mut self) {
        self.0.set();
    }
}

/// One shared primitive per strategy.
#[derive(Debug)]
pub struct SyncPrimitives {
    exclusive: ReentrantMutex<()>,
    mutex: Mutex<()>,
    signal: AutoResetEvent,
    permit: Semaphore,
}

impl Default for SyncPrimitives {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncPrimitives {
    pub fn new() -> Self {
        Self {
            exclusive: ReentrantMutex::new(()),
            mutex: Mutex::new(()),
            signal: AutoResetEvent::new(true),
            permit: Semaphore::new(1, 1),
        }
    }

    /// Runs `f` while holding the primitive for `strategy`.
    ///
    /// The primitive is released even if `f` panics.
    pub fn run<R>(&self, strategy: MutexStrategy, f: impl FnOnce() -> R) -> R {
        match strategy {
            MutexStrategy::ExclusiveLock => {
                let _guard = self.exclusive.lock();
                f()
            }
            MutexStrategy::Mutex => {
                let _guard = self.mutex.lock();
                f()
            }
            MutexStrategy::ManualSignal => {
                self.signal.wait();
                let _guard = SignalGuard(&self.signal);
                f()
            }
            MutexStrategy::CountingPermit => {
                let _guard = self.permit.acquire();
                f()
            }
        }
    }
}

/// Wraps `callback` so every invocation runs under the strategy's primitive.
pub fn wrap_with_mutex<A, R, F>(
    primitives: Arc<SyncPrimitives>,
    callback: F,
    strategy: MutexStrategy,
) -> impl Fn(A) -> R + Send + Sync + 'static
where
    F: Fn(A) -> R + Send + Sync + 'static,
{
    move |arg| primitives.run(strategy, || callback(arg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    const STRATEGIES: [MutexStrategy; 4] = [
        MutexStrategy::ExclusiveLock,
        MutexStrategy::Mutex,
        MutexStrategy::ManualSignal,
        MutexStrategy::CountingPermit,
    ];

    #[test]
    fn test_bodies_never_overlap() {
        for strategy in STRATEGIES {
            let primitives = Arc::new(SyncPrimitives::new());
            let inside = Arc::new(AtomicBool::new(false));
            let counter = Arc::new(AtomicUsize::new(0));

            let (i, c) = (inside.clone(), counter.clone());
            let wrapped = Arc::new(wrap_with_mutex(
                primitives,
                move |step: usize| {
                    assert!(!i.swap(true, Ordering::SeqCst), "overlap under {strategy:?}");
                    // non-atomic read-modify-write on purpose
                    let seen = c.load(Ordering::SeqCst);
                    thread::yield_now();
                    c.store(seen + step, Ordering::SeqCst);
                    i.store(false, Ordering::SeqCst);
                },
                strategy,
            ));

            let threads: Vec<_> = (0..4)
                .map(|_| {
                    let w = wrapped.clone();
                    thread::spawn(move || {
                        for _ in 0..50 {
                            w(1);
                        }
                    })
                })
                .collect();
            for t in threads {
                t.join().unwrap();
            }

            assert_eq!(counter.load(Ordering::SeqCst), 200, "{strategy:?}");
        }
    }

    #[test]
    fn test_exclusive_lock_is_reentrant() {
        let primitives = SyncPrimitives::new();
        let value = primitives.run(MutexStrategy::ExclusiveLock, || {
            primitives.run(MutexStrategy::ExclusiveLock, || 42)
        });
        assert_eq!(value, 42);
    }

    #[test]
    fn test_released_after_panic() {
        for strategy in STRATEGIES {
            let primitives = Arc::new(SyncPrimitives::new());
            let p = primitives.clone();
            let result = thread::spawn(move || p.run(strategy, || panic!("boom"))).join();
            assert!(result.is_err());

            assert_eq!(primitives.run(strategy, || 1), 1, "{strategy:?} stayed held");
        }
    }

    #[test]
    fn test_auto_reset_event() {
        let event = AutoResetEvent::new(true);
        event.wait();
        assert!(!event.is_set());
        assert!(!event.wait_timeout(Duration::from_millis(10)));
        event.set();
        assert!(event.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_semaphore_permits() {
        let semaphore = Semaphore::new(1, 1);
        let guard = semaphore.acquire();
        assert!(semaphore.try_acquire().is_none());
        drop(guard);
        assert_eq!(semaphore.available(), 1);
        assert!(semaphore.try_acquire().is_some());
    }
}
