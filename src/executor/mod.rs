//! Task execution infrastructure.
//!
//! Worker threads, job queues and the dynamically sized worker pool that
//! backs both the compute and the I/O lane of a coordinator.

pub mod panic_handler;
pub mod pool;
pub mod task;
mod worker;

pub use panic_handler::{PanicHandler, PanicStrategy};
pub use pool::{LaneState, WorkerPool};
pub use task::{TaskId, WorkItem};
