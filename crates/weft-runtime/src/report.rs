//! Task failure reporting
//!
//! An unhandled failure inside a task is caught at the task boundary and
//! handed to a [`FailureSink`] as a typed [`TaskFailure`]. The sink is an
//! explicit constructor parameter of the scheduler; there is no ambient
//! container or global logger lookup.

use crate::scheduler::TaskId;
use std::fmt;
use std::panic::Location;

/// Classification of an isolated task failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// A panic escaped the task's work closure.
    Panic,
    /// A panic escaped one of the task's deferred cleanups.
    CleanupPanic,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Panic => write!(f, "panic"),
            FailureKind::CleanupPanic => write!(f, "cleanup panic"),
        }
    }
}

/// Typed payload describing one isolated task failure.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    /// The failed task.
    pub task_id: TaskId,

    /// What kind of failure escaped.
    pub kind: FailureKind,

    /// Rendered failure payload (panic message where one exists).
    pub detail: String,

    /// Where the task was spawned from.
    pub spawned_at: &'static Location<'static>,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task {} {}: {} (spawned at {})",
            self.task_id.as_u64(),
            self.kind,
            self.detail,
            self.spawned_at
        )
    }
}

/// Receiver for isolated task failures.
pub trait FailureSink: Send + Sync {
    /// Report one failure. Called exactly once per escaped failure.
    fn report(&self, failure: &TaskFailure);
}

/// Default sink: logs every failure through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl FailureSink for TracingSink {
    fn report(&self, failure: &TaskFailure) {
        tracing::error!(
            task_id = failure.task_id.as_u64(),
            kind = %failure.kind,
            spawned_at = %failure.spawned_at,
            "unhandled task failure: {}",
            failure.detail
        );
    }
}

/// Sink that discards every report. Useful in tests that provoke failures.
#[derive(Debug, Default)]
pub struct NullSink;

impl FailureSink for NullSink {
    fn report(&self, _failure: &TaskFailure) {}
}

/// Render a panic payload into a human-readable detail string.
pub(crate) fn render_panic(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
