use super::Coordinator;
use crate::config::PoolLimits;
use crate::error::{Error, Result};
use crate::executor::LaneState;
use crate::handle::ExecutionHandle;
use crate::telemetry::MetricsSnapshot;
use crate::thread::ThreadInfo;

/// Snapshot of both pools. Fields are read one after another, not atomically.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolState {
    pub workers: LaneState,
    pub io: LaneState,
    pub completed: u64,
    pub pending: usize,
    pub panicked: u64,
    /// Worker-pool execution latency
    pub latency: MetricsSnapshot,
}

impl Coordinator {
    pub fn report_pool_state(&self) -> PoolState {
        let workers = self.worker_pool();
        let io = self.io_pool();
        let latency = workers.metrics();
        let io_metrics = io.metrics();

        PoolState {
            workers: workers.lane_state(),
            io: io.lane_state(),
            completed: workers.completed_tasks() + io.completed_tasks(),
            pending: workers.pending_tasks() + io.pending_tasks(),
            panicked: latency.panicked + io_metrics.panicked,
            latency,
        }
    }

    pub fn pool_limits(&self) -> PoolLimits {
        self.current_limits()
    }

    /// Applies new limits to both pools.
    ///
    /// Every pair is validated first; on error nothing changes. Extra
    /// workers are spawned on demand, surplus ones retire once idle.
    pub fn reconfigure_pool(&self, limits: PoolLimits) -> Result<()> {
        if let Err(err) = self.apply_limits(limits) {
            tracing::warn!(error = %err, ?limits, "pool reconfiguration rejected");
            return Err(err);
        }
        tracing::info!(?limits, "pool reconfigured");
        Ok(())
    }

    /// Sends the rendered pool state to the message sink.
    pub fn print_pool_state(&self) {
        let text = self.reporter.pool_state_text(&self.report_pool_state());
        self.reporter.emit(&text);
    }

    pub async fn print_pool_state_async(&self) {
        let text = self.reporter.pool_state_text(&self.report_pool_state());
        self.reporter.emit_async(text).await;
    }

    pub fn describe_handle<T>(&self, handle: &ExecutionHandle<T>) {
        let text = self.reporter.handle_text(&handle.summary());
        self.reporter.emit(&text);
    }

    /// Reports the id of the task running on the calling thread.
    pub fn describe_current_task(&self) {
        let text = self
            .reporter
            .current_task_text(ExecutionHandle::<()>::current_id());
        self.reporter.emit(&text);
    }

    pub fn describe_thread(&self, info: &ThreadInfo) {
        let text = self.reporter.thread_text(info);
        self.reporter.emit(&text);
    }

    /// Renders `err` through the message lookup and emits it.
    pub fn report_error(&self, err: &Error) {
        let text = self.reporter.error_text(err);
        self.reporter.emit(&text);
    }
}
