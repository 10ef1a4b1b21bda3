//! Main task scheduler coordinating worker threads

use crate::report::{FailureSink, TracingSink};
use crate::scheduler::current;
use crate::scheduler::task::{Task, TaskId, TaskState};
use crate::scheduler::worker::Worker;
use crossbeam_deque::{Injector, Worker as WorkerDeque};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scheduler statistics
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Total tasks spawned
    pub tasks_spawned: u64,

    /// Total tasks completed normally
    pub tasks_completed: u64,

    /// Total tasks that ended in an isolated failure
    pub tasks_failed: u64,

    /// Currently live tasks (created or running)
    pub active_tasks: usize,
}

/// Scheduler configuration
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Worker thread count (0 = number of CPU cores)
    pub worker_count: usize,

    /// Maximum concurrently live tasks (None = unlimited)
    pub max_concurrent_tasks: Option<usize>,
}

/// Errors returned by [`Scheduler::spawn`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpawnError {
    /// The live-task limit has been reached
    #[error("concurrent task limit reached ({limit})")]
    AtCapacity {
        /// The configured limit
        limit: usize,
    },

    /// The scheduler has been shut down
    #[error("scheduler is shut down")]
    ShutDown,
}

/// State shared between the scheduler handle and its workers.
pub(crate) struct SchedulerShared {
    /// Global task injector
    pub(crate) injector: Injector<Arc<Task>>,

    /// Task registry
    pub(crate) tasks: RwLock<FxHashMap<TaskId, Arc<Task>>>,

    /// Failure sink for isolated task failures
    pub(crate) sink: Arc<dyn FailureSink>,

    /// Whether spawn still accepts work
    pub(crate) accepting: AtomicBool,

    /// Total tasks spawned
    pub(crate) spawned: AtomicU64,

    /// Total tasks completed normally
    pub(crate) completed: AtomicU64,

    /// Total tasks failed
    pub(crate) failed: AtomicU64,
}

impl SchedulerShared {
    pub(crate) fn new(sink: Arc<dyn FailureSink>) -> Self {
        Self {
            injector: Injector::new(),
            tasks: RwLock::new(FxHashMap::default()),
            sink,
            accepting: AtomicBool::new(true),
            spawned: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }
}

/// Main task scheduler
pub struct Scheduler {
    /// Worker threads
    workers: Vec<Worker>,

    /// State shared with the workers
    shared: Arc<SchedulerShared>,

    /// Number of worker threads
    worker_count: usize,

    /// Whether the scheduler has been started
    started: bool,

    /// Configuration
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a new scheduler with the specified number of workers.
    /// If `worker_count` is 0, defaults to the number of CPU cores.
    pub fn new(worker_count: usize) -> Self {
        Self::with_config(SchedulerConfig {
            worker_count,
            ..SchedulerConfig::default()
        })
    }

    /// Create a new scheduler with a configuration and the default
    /// tracing-backed failure sink.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Create a new scheduler with an explicit failure sink.
    pub fn with_sink(config: SchedulerConfig, sink: Arc<dyn FailureSink>) -> Self {
        let worker_count = if config.worker_count == 0 {
            num_cpus::get()
        } else {
            config.worker_count
        };

        let shared = Arc::new(SchedulerShared::new(sink));

        // Create all deques up front so each worker can steal from the others.
        let mut deques = Vec::new();
        let mut stealers = Vec::new();
        for _ in 0..worker_count {
            let deque = WorkerDeque::new_lifo();
            stealers.push(deque.stealer());
            deques.push(deque);
        }

        let mut workers = Vec::new();
        for (id, deque) in deques.into_iter().enumerate() {
            let other_stealers: Vec<_> = stealers
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != id)
                .map(|(_, s)| s.clone())
                .collect();

            workers.push(Worker::new(id, deque, other_stealers, shared.clone()));
        }

        Self {
            workers,
            shared,
            worker_count,
            started: false,
            config,
        }
    }

    /// Start all worker threads
    pub fn start(&mut self) {
        if self.started || !self.shared.accepting.load(Ordering::Acquire) {
            return;
        }

        for worker in &mut self.workers {
            worker.start();
        }

        self.started = true;
    }

    /// Spawn a new task.
    ///
    /// The task inherits the calling task's id as its parent (when spawned
    /// from inside a task). Returns immediately; the work runs on a worker.
    #[track_caller]
    pub fn spawn<F>(&self, work: F) -> Result<TaskId, SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        let spawned_at = Location::caller();

        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err(SpawnError::ShutDown);
        }

        if let Some(limit) = self.config.max_concurrent_tasks {
            let live = {
                let tasks = self.shared.tasks.read();
                tasks
                    .values()
                    .filter(|task| {
                        matches!(task.state(), TaskState::Created | TaskState::Running)
                    })
                    .count()
            };

            if live >= limit {
                return Err(SpawnError::AtCapacity { limit });
            }
        }

        let parent = current::current_id();
        let task = Arc::new(Task::new(Box::new(work), parent, spawned_at));
        let task_id = task.id();

        self.shared.tasks.write().insert(task_id, task.clone());
        self.shared.injector.push(task);
        self.shared.spawned.fetch_add(1, Ordering::Relaxed);

        Ok(task_id)
    }

    /// Get a task by ID
    pub fn get_task(&self, task_id: TaskId) -> Option<Arc<Task>> {
        self.shared.tasks.read().get(&task_id).cloned()
    }

    /// Remove a finished task from the registry
    pub fn remove_task(&self, task_id: TaskId) -> Option<Arc<Task>> {
        self.shared.tasks.write().remove(&task_id)
    }

    /// Number of registered tasks
    pub fn task_count(&self) -> usize {
        self.shared.tasks.read().len()
    }

    /// Number of workers
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Check if the scheduler has been started
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Block until the task finishes or `timeout` elapses.
    ///
    /// Returns `true` if the task finished within the timeout (a task id
    /// that is no longer registered counts as finished).
    pub fn join(&self, task_id: TaskId, timeout: Duration) -> bool {
        match self.get_task(task_id) {
            Some(task) => task.wait(timeout),
            None => true,
        }
    }

    /// Wait for all registered tasks to finish (with timeout)
    pub fn wait_all(&self, timeout: Duration) -> bool {
        let start = std::time::Instant::now();

        loop {
            let all_done = {
                let tasks = self.shared.tasks.read();
                tasks.values().all(|task| {
                    let state = task.state();
                    state == TaskState::Completed || state == TaskState::Failed
                })
            };

            if all_done {
                return true;
            }

            if start.elapsed() > timeout {
                return false;
            }

            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let active_tasks = {
            let tasks = self.shared.tasks.read();
            tasks
                .values()
                .filter(|task| {
                    matches!(task.state(), TaskState::Created | TaskState::Running)
                })
                .count()
        };

        SchedulerStats {
            tasks_spawned: self.shared.spawned.load(Ordering::Relaxed),
            tasks_completed: self.shared.completed.load(Ordering::Relaxed),
            tasks_failed: self.shared.failed.load(Ordering::Relaxed),
            active_tasks,
        }
    }

    /// Shutdown the scheduler. Workers are joined and further spawns are
    /// rejected; a shut-down scheduler cannot be restarted.
    pub fn shutdown(&mut self) {
        if !self.started {
            return;
        }

        self.shared.accepting.store(false, Ordering::Release);

        for worker in &mut self.workers {
            worker.stop();
        }

        self.started = false;

        // Clear task registry
        self.shared.tasks.write().clear();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;
    use crate::report::{FailureKind, FailureSink, TaskFailure};
    use crate::scheduler::current::{current_id, in_task, parent_id};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    /// Sink that records every report, for assertions.
    #[derive(Default)]
    struct CollectingSink {
        failures: Mutex<Vec<TaskFailure>>,
    }

    impl FailureSink for CollectingSink {
        fn report(&self, failure: &TaskFailure) {
            self.failures.lock().push(failure.clone());
        }
    }

    fn quiet_scheduler(worker_count: usize) -> (Scheduler, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        let scheduler = Scheduler::with_sink(
            SchedulerConfig {
                worker_count,
                ..SchedulerConfig::default()
            },
            sink.clone(),
        );
        (scheduler, sink)
    }

    #[test]
    fn test_scheduler_creation() {
        let scheduler = Scheduler::new(4);
        assert_eq!(scheduler.worker_count(), 4);
        assert_eq!(scheduler.task_count(), 0);
        assert!(!scheduler.is_started());
    }

    #[test]
    fn test_scheduler_default_worker_count() {
        let scheduler = Scheduler::default();
        assert_eq!(scheduler.worker_count(), num_cpus::get());
    }

    #[test]
    fn test_scheduler_start_idempotent() {
        let mut scheduler = Scheduler::new(2);
        assert!(!scheduler.is_started());

        scheduler.start();
        assert!(scheduler.is_started());

        scheduler.start();
        assert!(scheduler.is_started());

        scheduler.shutdown();
    }

    #[test]
    fn test_scheduler_spawn_task() {
        let scheduler = Scheduler::new(2);

        let task_id = scheduler.spawn(|| {}).expect("Failed to spawn task");

        assert_eq!(scheduler.task_count(), 1);
        let retrieved = scheduler.get_task(task_id);
        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().id(), task_id);
    }

    #[test]
    fn test_scheduler_task_execution() {
        let mut scheduler = Scheduler::new(2);
        scheduler.start();

        let ran = Arc::new(AtomicBool::new(false));
        let task_id = {
            let ran = ran.clone();
            scheduler
                .spawn(move || ran.store(true, Ordering::Release))
                .expect("Failed to spawn task")
        };

        assert!(scheduler.join(task_id, Duration::from_secs(1)));
        assert!(ran.load(Ordering::Acquire));
        assert_eq!(
            scheduler.get_task(task_id).unwrap().state(),
            TaskState::Completed
        );

        scheduler.shutdown();
    }

    #[test]
    fn test_scheduler_multiple_tasks() {
        let mut scheduler = Scheduler::new(2);
        scheduler.start();

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            scheduler
                .spawn(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                })
                .expect("Failed to spawn task");
        }

        assert!(scheduler.wait_all(Duration::from_secs(2)));
        assert_eq!(counter.load(Ordering::Relaxed), 10);

        let stats = scheduler.stats();
        assert_eq!(stats.tasks_spawned, 10);
        assert_eq!(stats.tasks_completed, 10);
        assert_eq!(stats.tasks_failed, 0);
        assert_eq!(stats.active_tasks, 0);

        scheduler.shutdown();
    }

    #[test]
    fn test_scheduler_remove_task() {
        let scheduler = Scheduler::new(2);

        let task_id = scheduler.spawn(|| {}).expect("Failed to spawn task");
        assert_eq!(scheduler.task_count(), 1);

        assert!(scheduler.remove_task(task_id).is_some());
        assert_eq!(scheduler.task_count(), 0);
        assert!(scheduler.get_task(task_id).is_none());
    }

    #[test]
    fn test_scheduler_shutdown_rejects_spawn() {
        let mut scheduler = Scheduler::new(2);
        scheduler.start();
        scheduler.shutdown();

        assert!(!scheduler.is_started());
        assert_eq!(scheduler.spawn(|| {}), Err(SpawnError::ShutDown));
    }

    #[test]
    fn test_scheduler_spawn_limit() {
        let (mut scheduler, _sink) = quiet_scheduler(2);
        scheduler.config.max_concurrent_tasks = Some(1);
        scheduler.start();

        let gate = Arc::new(AtomicBool::new(false));
        let first = {
            let gate = gate.clone();
            scheduler
                .spawn(move || {
                    while !gate.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(1));
                    }
                })
                .expect("Failed to spawn task")
        };

        // Give the first task time to start running.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(
            scheduler.spawn(|| {}),
            Err(SpawnError::AtCapacity { limit: 1 })
        );

        gate.store(true, Ordering::Release);
        assert!(scheduler.join(first, Duration::from_secs(1)));

        // The limit counts live tasks only; a finished one frees a slot.
        assert!(scheduler.spawn(|| {}).is_ok());

        scheduler.shutdown();
    }

    #[test]
    fn test_scheduler_wait_all_timeout() {
        let scheduler = Scheduler::new(2);
        // Not started, so the task never runs.
        scheduler.spawn(|| {}).expect("Failed to spawn task");

        assert!(!scheduler.wait_all(Duration::from_millis(100)));
    }

    #[test]
    fn test_current_and_parent_ids() {
        let mut scheduler = Scheduler::new(2);
        scheduler.start();
        let scheduler = Arc::new(scheduler);

        assert!(current_id().is_none());
        assert!(!in_task());

        let observed = Arc::new(Mutex::new(None));
        let outer = {
            let scheduler = scheduler.clone();
            let observed = observed.clone();
            scheduler
                .clone()
                .spawn(move || {
                    let my_id = current_id().expect("should be in a task");
                    assert!(in_task());
                    assert!(parent_id().is_none());

                    let observed = observed.clone();
                    let inner = scheduler
                        .spawn(move || {
                            *observed.lock() = parent_id();
                        })
                        .expect("Failed to spawn inner task");
                    assert_ne!(inner, my_id);
                })
                .expect("Failed to spawn outer task")
        };

        assert!(scheduler.join(outer, Duration::from_secs(1)));
        assert!(scheduler.wait_all(Duration::from_secs(1)));

        let outer_task = scheduler.get_task(outer).unwrap();
        assert_eq!(*observed.lock(), Some(outer_task.id()));
    }

    #[test]
    fn test_failure_isolated_and_reported_once() {
        let (mut scheduler, sink) = quiet_scheduler(2);
        scheduler.start();

        let failed = scheduler
            .spawn(|| panic!("intentional test failure"))
            .expect("Failed to spawn task");
        let survivor = scheduler.spawn(|| {}).expect("Failed to spawn task");

        assert!(scheduler.wait_all(Duration::from_secs(2)));
        assert_eq!(scheduler.get_task(failed).unwrap().state(), TaskState::Failed);
        assert_eq!(
            scheduler.get_task(survivor).unwrap().state(),
            TaskState::Completed
        );

        let failures = sink.failures.lock();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].task_id, failed);
        assert_eq!(failures[0].kind, FailureKind::Panic);
        assert!(failures[0].detail.contains("intentional test failure"));

        drop(failures);
        scheduler.shutdown();
    }

    #[test]
    fn test_defer_runs_on_completion_and_failure() {
        let (mut scheduler, _sink) = quiet_scheduler(2);
        scheduler.start();

        let order = Arc::new(Mutex::new(Vec::new()));

        let ok = {
            let order = order.clone();
            scheduler
                .spawn(move || {
                    let o1 = order.clone();
                    crate::scheduler::defer(move || o1.lock().push("ok-first"));
                    let o2 = order.clone();
                    crate::scheduler::defer(move || o2.lock().push("ok-second"));
                })
                .expect("Failed to spawn task")
        };
        assert!(scheduler.join(ok, Duration::from_secs(1)));
        // LIFO: the later registration runs first.
        assert_eq!(*order.lock(), vec!["ok-second", "ok-first"]);

        order.lock().clear();
        let failing = {
            let order = order.clone();
            scheduler
                .spawn(move || {
                    let o = order.clone();
                    crate::scheduler::defer(move || o.lock().push("after-panic"));
                    panic!("fail after defer");
                })
                .expect("Failed to spawn task")
        };
        assert!(scheduler.join(failing, Duration::from_secs(1)));
        assert_eq!(*order.lock(), vec!["after-panic"]);

        scheduler.shutdown();
    }

    #[test]
    fn test_context_cleared_after_task() {
        let mut scheduler = Scheduler::new(2);
        scheduler.start();

        let task_id = scheduler
            .spawn(|| {
                assert!(context::set("marker", Arc::new(1u32)));
                assert!(context::has("marker"));
            })
            .expect("Failed to spawn task");

        assert!(scheduler.join(task_id, Duration::from_secs(1)));
        let task = scheduler.get_task(task_id).unwrap();
        assert!(task.with_context(|ctx| ctx.is_empty()));

        scheduler.shutdown();
    }

    #[test]
    fn test_context_isolated_between_tasks() {
        let mut scheduler = Scheduler::new(2);
        scheduler.start();

        let leaked = Arc::new(AtomicBool::new(false));

        let writer = scheduler
            .spawn(|| {
                context::set("private", Arc::new(42u64));
                // Hold the key long enough for the reader to probe.
                thread::sleep(Duration::from_millis(100));
                assert!(context::has("private"));
            })
            .expect("Failed to spawn task");

        thread::sleep(Duration::from_millis(20));
        let reader = {
            let leaked = leaked.clone();
            scheduler
                .spawn(move || {
                    if context::has("private") {
                        leaked.store(true, Ordering::Release);
                    }
                })
                .expect("Failed to spawn task")
        };

        assert!(scheduler.join(writer, Duration::from_secs(1)));
        assert!(scheduler.join(reader, Duration::from_secs(1)));
        assert!(!leaked.load(Ordering::Acquire));

        scheduler.shutdown();
    }
}
