//! Task scheduler — work-stealing cooperative execution
//!
//! Many lightweight tasks run on a small fixed pool of worker threads. A task
//! runs to completion on one worker; failures are isolated at the task
//! boundary and reported to the scheduler's failure sink, never propagated to
//! the spawner or to sibling tasks.

pub(crate) mod current;
#[allow(clippy::module_inception)]
mod scheduler;
mod task;
mod worker;

pub use current::{current_id, defer, in_task, parent_id};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStats, SpawnError};
pub use task::{Task, TaskId, TaskState};
pub use worker::Worker;
