//! Current-task tracking
//!
//! Workers install the task they are executing into a thread local for the
//! duration of the run (cleanups included). The functions here are the whole
//! task-introspection surface: `current_id`, `parent_id`, `in_task`, `defer`.

use crate::scheduler::task::{Task, TaskId};
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static CURRENT: RefCell<Option<Arc<Task>>> = const { RefCell::new(None) };
}

/// Marks the current thread as executing `task` until dropped.
pub(crate) struct CurrentGuard;

impl CurrentGuard {
    pub(crate) fn enter(task: Arc<Task>) -> Self {
        CURRENT.with(|current| *current.borrow_mut() = Some(task));
        CurrentGuard
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT.with(|current| *current.borrow_mut() = None);
    }
}

/// Run `f` against the task executing on this thread, if any.
pub(crate) fn with_current<R>(f: impl FnOnce(&Arc<Task>) -> R) -> Option<R> {
    CURRENT.with(|current| current.borrow().as_ref().map(f))
}

/// The id of the task executing on this thread, or `None` when called from
/// the root (non-task) context.
pub fn current_id() -> Option<TaskId> {
    with_current(|task| task.id())
}

/// The id of the task that spawned the current one, or `None` when the
/// current task has no parent or no task is active.
pub fn parent_id() -> Option<TaskId> {
    with_current(|task| task.parent()).flatten()
}

/// Whether this thread is currently executing a task.
pub fn in_task() -> bool {
    current_id().is_some()
}

/// Register a cleanup to run when the current task ends, on every exit path.
///
/// Cleanups run in LIFO order after the task's work returns or panics.
/// Returns `false` (registering nothing) when no task is active.
pub fn defer(f: impl FnOnce() + Send + 'static) -> bool {
    with_current(|task| task.push_cleanup(Box::new(f))).is_some()
}
