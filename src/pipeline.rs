//! Ordered handler lists.

use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::executor::WorkItem;
use crate::handle::ExecutionHandle;
use std::fmt;
use std::sync::Arc;

type Handler<A> = Arc<dyn Fn(&A) + Send + Sync + 'static>;

/// Handlers run one after another, in registration order, against the same
/// argument.
pub struct Pipeline<A> {
    handlers: Vec<Handler<A>>,
}

impl<A> Default for Pipeline<A> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }
}

impl<A> Clone for Pipeline<A> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<A> Pipeline<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler.
    pub fn then<F>(mut self, handler: F) -> Self
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn run(&self, arg: &A) {
        for handler in &self.handlers {
            handler(arg);
        }
    }
}

impl<A> fmt::Debug for Pipeline<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl Coordinator {
    /// Runs the whole pipeline against `arg` as one background work item.
    ///
    /// A panicking handler faults the handle; later handlers do not run.
    pub fn submit_pipeline<A>(&self, pipeline: &Pipeline<A>, arg: A) -> Result<ExecutionHandle<()>>
    where
        A: Send + 'static,
    {
        let pipeline = pipeline.clone();
        self.submit_background(WorkItem::with_payload(
            move |arg: A| pipeline.run(&arg),
            arg,
        ))
    }
}
