//! Human-readable reporting through pluggable sinks and message lookups.
//!
//! Coordinator operations never print. Text is built from keyed templates
//! resolved through a [`MessageLookup`] and handed to a [`MessageSink`].

use crate::coordinator::PoolState;
use crate::error::Error;
use crate::executor::{LaneState, TaskId};
use crate::handle::HandleSummary;
use crate::thread::ThreadInfo;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Destination for rendered report lines.
pub trait MessageSink: Send + Sync {
    fn emit(&self, message: &str);

    fn emit_async(&self, message: String) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.emit(&message) })
    }
}

/// Resolves message keys to display text.
pub trait MessageLookup: Send + Sync {
    fn lookup<'a>(&'a self, key: &'a str) -> Cow<'a, str>;
}

/// Emits each line as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MessageSink for TracingSink {
    fn emit(&self, message: &str) {
        tracing::info!(target: "taskweave::report", "{message}");
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl MessageSink for MemorySink {
    fn emit(&self, message: &str) {
        self.lines.lock().push(message.to_owned());
    }
}

/// Uses the key itself as the text.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyLookup;

impl MessageLookup for KeyLookup {
    fn lookup<'a>(&'a self, key: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(key)
    }
}

/// Table-driven lookup; unknown keys fall back to the key.
#[derive(Debug, Default, Clone)]
pub struct MapLookup {
    entries: HashMap<String, String>,
}

impl MapLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, text: V) -> &mut Self {
        self.entries.insert(key.into(), text.into());
        self
    }

    /// English labels for every key the reporter uses.
    pub fn english() -> Self {
        [
            ("pool.workers", "Worker threads"),
            ("pool.io", "I/O threads"),
            ("pool.live", "live"),
            ("pool.idle", "idle"),
            ("pool.min", "min"),
            ("pool.max", "max"),
            ("pool.completed", "Completed work items"),
            ("pool.pending", "Pending work items"),
            ("pool.panicked", "Panicked work items"),
            ("pool.latency", "Latency p50/p99"),
            ("task.id", "Task"),
            ("task.status", "status"),
            ("task.failure", "failure"),
            ("task.current", "Current task"),
            ("task.none", "none"),
            ("thread.name", "Thread"),
            ("thread.cpu", "cpu"),
            ("error.invalid_state", "Invalid operation"),
            ("error.pool_unavailable", "Pool unavailable"),
            ("error.pool_config", "Invalid pool configuration"),
            ("error.faulted", "Work item failed"),
            ("error.canceled", "Operation canceled"),
            ("error.timeout", "Timed out"),
            ("error.aggregate", "One or more work items failed"),
            ("error.thread_spawn", "Could not start thread"),
        ]
        .into_iter()
        .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapLookup {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl MessageLookup for MapLookup {
    fn lookup<'a>(&'a self, key: &'a str) -> Cow<'a, str> {
        match self.entries.get(key) {
            Some(text) => Cow::Borrowed(text.as_str()),
            None => Cow::Borrowed(key),
        }
    }
}

/// Renders coordinator state and forwards it to a sink.
#[derive(Clone)]
pub struct Reporter {
    sink: Arc<dyn MessageSink>,
    lookup: Arc<dyn MessageLookup>,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink), Arc::new(MapLookup::english()))
    }
}

impl Reporter {
    pub fn new(sink: Arc<dyn MessageSink>, lookup: Arc<dyn MessageLookup>) -> Self {
        Self { sink, lookup }
    }

    fn text<'a>(&'a self, key: &'a str) -> Cow<'a, str> {
        self.lookup.lookup(key)
    }

    fn lane_text(&self, key: &str, lane: &LaneState) -> String {
        format!(
            "{}: {} {}, {} {}, {} {}, {} {}",
            self.text(key),
            self.text("pool.live"),
            lane.live,
            self.text("pool.idle"),
            lane.idle,
            self.text("pool.min"),
            lane.min,
            self.text("pool.max"),
            lane.max,
        )
    }

    pub fn pool_state_text(&self, state: &PoolState) -> String {
        [
            self.lane_text("pool.workers", &state.workers),
            self.lane_text("pool.io", &state.io),
            format!("{}: {}", self.text("pool.completed"), state.completed),
            format!("{}: {}", self.text("pool.pending"), state.pending),
            format!("{}: {}", self.text("pool.panicked"), state.panicked),
            format!(
                "{}: {:?}/{:?}",
                self.text("pool.latency"),
                state.latency.p50_latency,
                state.latency.p99_latency
            ),
        ]
        .join("\n")
    }

    pub fn handle_text(&self, summary: &HandleSummary) -> String {
        let mut text = format!(
            "{} {}: {} {}",
            self.text("task.id"),
            summary.id,
            self.text("task.status"),
            summary.status
        );
        if let Some(failure) = &summary.failure {
            text.push_str(&format!(", {} {}", self.text("task.failure"), failure));
        }
        text
    }

    pub fn current_task_text(&self, id: Option<TaskId>) -> String {
        match id {
            Some(id) => format!("{}: {}", self.text("task.current"), id),
            None => format!("{}: {}", self.text("task.current"), self.text("task.none")),
        }
    }

    pub fn thread_text(&self, info: &ThreadInfo) -> String {
        let mut text = format!(
            "{}: {} ({:?})",
            self.text("thread.name"),
            info.name.as_deref().unwrap_or("<unnamed>"),
            info.id
        );
        if let Some(cpu) = info.processor {
            text.push_str(&format!(", {} {}", self.text("thread.cpu"), cpu));
        }
        text
    }

    /// Localized label for the error's kind followed by its details.
    pub fn error_text(&self, err: &Error) -> String {
        format!("{}: {}", self.text(err.message_key()), err)
    }

    pub fn emit(&self, message: &str) {
        self.sink.emit(message);
    }

    pub async fn emit_async(&self, message: String) {
        self.sink.emit_async(message).await;
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter").finish_non_exhaustive()
    }
}
