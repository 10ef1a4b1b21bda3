//! Weft cooperative task runtime
//!
//! This crate provides the task half of weft:
//! - Work-stealing task scheduler (green-thread style, small fixed worker pool)
//! - Per-task context store (key/value state invisible outside its owning task)
//! - Deferred cleanups that run on every task exit path
//! - Failure isolation: a panic inside a task is reported to an injected
//!   sink and never reaches the spawner, sibling tasks, or the process

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod context;
pub mod report;
pub mod scheduler;

pub use context::ContextStore;
pub use report::{FailureKind, FailureSink, NullSink, TaskFailure, TracingSink};
pub use scheduler::{
    current_id, defer, in_task, parent_id, Scheduler, SchedulerConfig, SchedulerStats, SpawnError,
    Task, TaskId, TaskState,
};
