//! taskweave - task and thread coordination
//!
//! A [`Coordinator`] owns a work-stealing worker pool, a separate I/O pool,
//! a timer thread and one mutual-exclusion primitive per [`MutexStrategy`].
//! Work is submitted as fire-and-forget jobs, as handles that can be started,
//! chained and joined, or as cooperatively cancellable parallel loops.
//!
//! # Quick Start
//!
//! ```no_run
//! use taskweave::prelude::*;
//!
//! let coordinator = Coordinator::new(Config::default()).unwrap();
//!
//! let handle = coordinator
//!     .run_immediate(WorkItem::new(|| 6 * 7), CancellationSignal::new())
//!     .unwrap();
//! assert_eq!(handle.join().unwrap(), 42);
//!
//! let outcome = coordinator
//!     .parallel_for(0, 1000, |i| { let _ = i * 2; }, &LoopOptions::new())
//!     .unwrap();
//! assert!(outcome.is_completed());
//! ```
//!
//! # Features
//!
//! - **Elastic pools**: workers spawn on demand up to `max` and retire to `min`
//! - **Work stealing**: global injector plus per-worker deques
//! - **Handles**: Pending/Running/terminal lifecycle, continuations, waits
//! - **Parallel loops**: caller-participating loops with early stop and
//!   cancellation
//! - **Reporting**: pluggable sinks and message lookups, `tracing` by default

#![warn(missing_debug_implementations)]

pub mod async_bridge;
pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod handle;
pub mod parallel;
pub mod pipeline;
pub mod prelude;
pub mod report;
pub mod sync;
pub mod telemetry;
pub mod thread;
pub mod timer;
pub mod util;

pub use cancel::{CallbackKey, CancellationSignal};
pub use config::{Config, ConfigBuilder, PoolLimits};
pub use coordinator::{
    ContinuationOptions, Coordinator, PoolState, RunOn, SchedulerHint, StartMode, WaitMode,
};
pub use error::{Error, ErrorKind, Failure, FailureOrigin, Fallible, Result};
pub use executor::{LaneState, PanicStrategy, TaskId, WorkItem};
pub use handle::{Completed, CreationOptions, ExecutionHandle, HandleSummary, TaskStatus};
pub use parallel::{LoopOptions, LoopOutcome, ParallelQuery};
pub use pipeline::Pipeline;
pub use report::{KeyLookup, MapLookup, MemorySink, MessageLookup, MessageSink, Reporter, TracingSink};
pub use sync::MutexStrategy;
pub use thread::{current_processor_id, current_thread_info, spawn_thread, ThreadHandle, ThreadInfo, ThreadSpec};
pub use timer::Delay;
