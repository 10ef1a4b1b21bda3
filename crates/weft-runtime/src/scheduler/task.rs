//! Task structure and lifecycle state

use crate::context::ContextStore;
use parking_lot::{Condvar, Mutex};
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a TaskId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Just created, not yet picked up by a worker
    Created,
    /// Currently executing on a worker
    Running,
    /// Finished normally
    Completed,
    /// Finished by an isolated failure
    Failed,
}

pub(crate) type TaskFn = Box<dyn FnOnce() + Send + 'static>;
pub(crate) type CleanupFn = Box<dyn FnOnce() + Send + 'static>;

/// A lightweight unit of cooperative execution.
///
/// A task exclusively owns its [`ContextStore`]; no other task can read or
/// write it. Deferred cleanups registered while the task runs execute in LIFO
/// order when the task ends, on the success and the failure path alike.
pub struct Task {
    /// Unique identifier
    id: TaskId,

    /// Task that spawned this one, if any
    parent: Option<TaskId>,

    /// Current state
    state: Mutex<TaskState>,

    /// Work to execute; taken by the worker that runs the task
    work: Mutex<Option<TaskFn>>,

    /// Per-task key/value store, empty at task start
    context: Mutex<ContextStore>,

    /// Deferred cleanups, run LIFO at task end
    cleanups: Mutex<Vec<CleanupFn>>,

    /// Where the task was spawned from (for failure reports)
    spawned_at: &'static Location<'static>,

    /// Completion tracking for blocking joins; the bool flips once the task
    /// has finished (completed or failed)
    completion_lock: Mutex<bool>,

    /// Condvar for blocking until the task finishes
    completion_condvar: Condvar,
}

impl Task {
    /// Create a new Task
    pub(crate) fn new(
        work: TaskFn,
        parent: Option<TaskId>,
        spawned_at: &'static Location<'static>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            parent,
            state: Mutex::new(TaskState::Created),
            work: Mutex::new(Some(work)),
            context: Mutex::new(ContextStore::new()),
            cleanups: Mutex::new(Vec::new()),
            spawned_at,
            completion_lock: Mutex::new(false),
            completion_condvar: Condvar::new(),
        }
    }

    /// Get the task ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the parent task ID, if this task was spawned from another task
    pub fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    /// Get the current state
    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Set the state
    pub(crate) fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }

    /// Where the task was spawned from
    pub fn spawned_at(&self) -> &'static Location<'static> {
        self.spawned_at
    }

    /// Take the work closure. Returns `None` if it was already taken.
    pub(crate) fn take_work(&self) -> Option<TaskFn> {
        self.work.lock().take()
    }

    /// Run `f` with exclusive access to this task's context store.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut ContextStore) -> R) -> R {
        f(&mut self.context.lock())
    }

    /// Discard the context store's contents.
    pub(crate) fn clear_context(&self) {
        self.context.lock().clear();
    }

    /// Register a cleanup to run when the task ends.
    pub(crate) fn push_cleanup(&self, cleanup: CleanupFn) {
        self.cleanups.lock().push(cleanup);
    }

    /// Take all registered cleanups (in registration order).
    pub(crate) fn take_cleanups(&self) -> Vec<CleanupFn> {
        std::mem::take(&mut *self.cleanups.lock())
    }

    /// Mark the task finished and wake every blocked joiner.
    pub(crate) fn finish(&self, state: TaskState) {
        self.set_state(state);
        let mut finished = self.completion_lock.lock();
        *finished = true;
        self.completion_condvar.notify_all();
    }

    /// Whether the task has finished (completed or failed).
    pub fn is_finished(&self) -> bool {
        *self.completion_lock.lock()
    }

    /// Block until the task finishes or `timeout` elapses.
    ///
    /// Returns `true` if the task finished within the timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut finished = self.completion_lock.lock();
        while !*finished {
            if self
                .completion_condvar
                .wait_until(&mut finished, deadline)
                .timed_out()
            {
                return *finished;
            }
        }
        true
    }
}
