//! Worker thread that executes tasks

use crate::report::{render_panic, FailureKind, TaskFailure};
use crate::scheduler::current::CurrentGuard;
use crate::scheduler::scheduler::SchedulerShared;
use crate::scheduler::task::{Task, TaskState};
use crossbeam_deque::{Steal, Stealer, Worker as WorkerDeque};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Worker thread that executes tasks
pub struct Worker {
    /// Worker ID
    id: usize,

    /// Local deque; moved onto the worker thread on start (the deque itself
    /// is not Sync, so it is parked behind a lock until then)
    deque: Mutex<Option<WorkerDeque<Arc<Task>>>>,

    /// Stealers from the other workers
    stealers: Vec<Stealer<Arc<Task>>>,

    /// Scheduler state shared by every worker
    shared: Arc<SchedulerShared>,

    /// Worker thread handle
    handle: Option<thread::JoinHandle<()>>,

    /// Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    /// Create a new Worker
    pub(crate) fn new(
        id: usize,
        deque: WorkerDeque<Arc<Task>>,
        stealers: Vec<Stealer<Arc<Task>>>,
        shared: Arc<SchedulerShared>,
    ) -> Self {
        Self {
            id,
            deque: Mutex::new(Some(deque)),
            stealers,
            shared,
            handle: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the worker thread
    pub(crate) fn start(&mut self) {
        let deque = match self.deque.lock().take() {
            Some(deque) => deque,
            None => return, // already started once
        };

        let id = self.id;
        let stealers = self.stealers.clone();
        let shared = self.shared.clone();
        let shutdown = self.shutdown.clone();

        let handle = thread::Builder::new()
            .name(format!("weft-worker-{}", id))
            .spawn(move || {
                Worker::run_loop(id, deque, stealers, shared, shutdown);
            })
            .expect("Failed to spawn worker thread");

        self.handle = Some(handle);
    }

    /// Stop the worker thread
    pub(crate) fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);

        if let Some(handle) = self.handle.take() {
            handle.join().expect("Failed to join worker thread");
        }
    }

    /// Worker thread main loop
    fn run_loop(
        id: usize,
        deque: WorkerDeque<Arc<Task>>,
        stealers: Vec<Stealer<Arc<Task>>>,
        shared: Arc<SchedulerShared>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }

            let task = match Self::find_work(&deque, &stealers, &shared) {
                Some(task) => task,
                None => {
                    // No work available, sleep briefly to avoid busy-waiting
                    thread::sleep(Duration::from_micros(100));
                    continue;
                }
            };

            Self::run_task(task, &shared);
        }

        tracing::trace!(worker = id, "worker shutting down");
    }

    /// Find work: local pop, then steal, then the global injector
    fn find_work(
        deque: &WorkerDeque<Arc<Task>>,
        stealers: &[Stealer<Arc<Task>>],
        shared: &Arc<SchedulerShared>,
    ) -> Option<Arc<Task>> {
        // 1. Try local deque (LIFO - cache locality)
        if let Some(task) = deque.pop() {
            return Some(task);
        }

        // 2. Try stealing from other workers (load balancing)
        loop {
            if let Some(task) = Self::steal_from_others(stealers) {
                return Some(task);
            }

            // 3. Try global injector
            match shared.injector.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }

        None
    }

    /// Steal from other workers, starting at a random victim
    fn steal_from_others(stealers: &[Stealer<Arc<Task>>]) -> Option<Arc<Task>> {
        use rand::Rng;

        if stealers.is_empty() {
            return None;
        }

        let mut rng = rand::thread_rng();
        let start = rng.gen_range(0..stealers.len());

        for i in 0..stealers.len() {
            let stealer = &stealers[(start + i) % stealers.len()];

            loop {
                match stealer.steal() {
                    Steal::Success(task) => return Some(task),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }

        None
    }

    /// Execute one task to completion: run the work closure with panic
    /// isolation, drain the deferred cleanups (LIFO), discard the context
    /// store, then publish the final state.
    fn run_task(task: Arc<Task>, shared: &Arc<SchedulerShared>) {
        let work = match task.take_work() {
            Some(work) => work,
            None => return, // already executed
        };

        task.set_state(TaskState::Running);

        let guard = CurrentGuard::enter(task.clone());
        let result = panic::catch_unwind(AssertUnwindSafe(work));

        // Cleanups run while the task is still current, so they can read the
        // context store. One panicking cleanup must not strand the rest.
        for cleanup in task.take_cleanups().into_iter().rev() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(cleanup)) {
                shared.sink.report(&TaskFailure {
                    task_id: task.id(),
                    kind: FailureKind::CleanupPanic,
                    detail: render_panic(payload.as_ref()),
                    spawned_at: task.spawned_at(),
                });
            }
        }
        drop(guard);

        // The store dies with the task, on every exit path.
        task.clear_context();

        match result {
            Ok(()) => {
                task.finish(TaskState::Completed);
                shared.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                shared.sink.report(&TaskFailure {
                    task_id: task.id(),
                    kind: FailureKind::Panic,
                    detail: render_panic(payload.as_ref()),
                    spawned_at: task.spawned_at(),
                });
                task.finish(TaskState::Failed);
                shared.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Get the worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Check if the worker is running
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
