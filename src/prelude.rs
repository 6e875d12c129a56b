pub use crate::cancel::CancellationSignal;
pub use crate::config::{Config, ConfigBuilder, PoolLimits};
pub use crate::coordinator::{
    ContinuationOptions, Coordinator, RunOn, SchedulerHint, StartMode, WaitMode,
};
pub use crate::error::{Error, Failure, Result};
pub use crate::executor::WorkItem;
pub use crate::handle::{Completed, CreationOptions, ExecutionHandle, TaskStatus};
pub use crate::parallel::{LoopOptions, LoopOutcome};
pub use crate::sync::MutexStrategy;

pub use crate::async_bridge::{block_on, yield_point};
pub use crate::telemetry::MetricsSnapshot;
