//! Async task spawning on the worker pool.

use crate::cancel::CancellationSignal;
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::executor::WorkItem;
use crate::handle::ExecutionHandle;
use std::future::Future;

impl Coordinator {
    /// Drives `future` to completion on a worker thread.
    ///
    /// The worker is occupied until the future resolves; await the returned
    /// handle's [`completion`](ExecutionHandle::completion) or join it.
    pub fn spawn_future<F, T>(&self, future: F) -> Result<ExecutionHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_immediate(
            WorkItem::new(move || futures::executor::block_on(future)),
            CancellationSignal::new(),
        )
    }
}

/// Block on a future in the current thread
pub fn block_on<F>(future: F) -> F::Output
where
    F: Future,
{
    futures::executor::block_on(future)
}
