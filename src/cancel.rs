//! Cooperative cancellation.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Shared flag requesting cooperative stop.
///
/// Moves from unset to canceled exactly once and never resets. Clones observe
/// the same flag.
#[derive(Clone, Default)]
pub struct CancellationSignal {
    inner: Arc<Inner>,
}

/// Identifies a callback registered with [`CancellationSignal::on_cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackKey(u64);

#[derive(Default)]
struct Inner {
    canceled: AtomicBool,
    callbacks: Mutex<Callbacks>,
}

#[derive(Default)]
struct Callbacks {
    next_key: u64,
    entries: Vec<(CallbackKey, Callback)>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signal. Returns `true` only for the call that set it.
    pub fn cancel(&self) -> bool {
        if self.inner.canceled.swap(true, Ordering::AcqRel) {
            return false;
        }

        let callbacks = std::mem::take(&mut self.inner.callbacks.lock().entries);
        for (_, callback) in callbacks {
            callback();
        }
        true
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// `Err(Error::Canceled)` once the signal is set.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }

    /// Runs `f` when the signal is set, or right away if it already is.
    ///
    /// Returns the key of the stored callback, or `None` when `f` already ran.
    pub fn on_cancel<F>(&self, f: F) -> Option<CallbackKey>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut callbacks = self.inner.callbacks.lock();
            if !self.is_canceled() {
                let key = CallbackKey(callbacks.next_key);
                callbacks.next_key += 1;
                callbacks.entries.push((key, Box::new(f)));
                return Some(key);
            }
        }
        f();
        None
    }

    /// Drops a callback that has not run yet. Returns `false` if it already ran
    /// or was removed.
    pub fn remove_callback(&self, key: CallbackKey) -> bool {
        let removed = {
            let mut callbacks = self.inner.callbacks.lock();
            callbacks
                .entries
                .iter()
                .position(|(k, _)| *k == key)
                .map(|at| callbacks.entries.swap_remove(at))
        };
        removed.is_some()
    }

    /// Callbacks still waiting for the signal.
    pub fn pending_callbacks(&self) -> usize {
        self.inner.callbacks.lock().entries.len()
    }
}

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
