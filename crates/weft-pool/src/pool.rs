//! Bounded resource pool
//!
//! A pool owns up to `max_size` handles for one named backend. Acquirers take
//! an idle handle, grow the pool through the [`Connector`], or join a FIFO
//! wait queue and park until a release hands them a handle directly. Loans
//! are accounted by handle id: a handle can be released exactly once per
//! loan, and releasing anything else is rejected.
//!
//! Unlike an OS-level lock, waiting here parks the acquirer on a per-waiter
//! condvar with a deadline, so a blocked acquirer costs nothing until a
//! release (or the timeout) wakes it.

use crate::config::PoolConfig;
use crate::connector::Connector;
use crate::error::PoolError;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// One pooled resource instance.
///
/// Handles are shared as [`ConnHandle`]s; two calls that observe "the same
/// connection" observe the same `Arc` and the same [`id`](Self::id).
#[derive(Debug)]
pub struct PooledConn<T> {
    /// Process-unique handle id (loan accounting key)
    id: u64,

    /// When the backend produced this resource
    created_at: Instant,

    /// The resource itself
    conn: T,
}

impl<T> PooledConn<T> {
    pub(crate) fn new(conn: T) -> Self {
        Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            created_at: Instant::now(),
            conn,
        }
    }

    /// Process-unique handle id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the backend produced this resource.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// The underlying resource.
    pub fn conn(&self) -> &T {
        &self.conn
    }
}

impl<T> Deref for PooledConn<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.conn
    }
}

/// Shared handle to a pooled resource.
pub type ConnHandle<T> = Arc<PooledConn<T>>;

struct IdleConn<T> {
    conn: ConnHandle<T>,
    idle_since: Instant,
}

/// What a parked acquirer is woken with.
enum WaiterSignal<T> {
    /// A released handle, loaned directly to this waiter.
    Conn(ConnHandle<T>),
    /// Capacity freed (a create failed); re-run the acquire path.
    Retry,
}

struct Waiter<T> {
    slot: Mutex<Option<WaiterSignal<T>>>,
    condvar: Condvar,
}

impl<T> Waiter<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            condvar: Condvar::new(),
        }
    }

    /// Fill the slot and wake the parked acquirer. Callers hold the pool
    /// state lock, which is what makes delivery atomic with queue removal.
    fn deliver(&self, signal: WaiterSignal<T>) {
        *self.slot.lock() = Some(signal);
        self.condvar.notify_one();
    }
}

struct PoolState<T> {
    /// Released handles awaiting reuse; oldest at the front
    idle: VecDeque<IdleConn<T>>,

    /// Handles currently on loan (plus capacity reserved for in-flight creates)
    active: usize,

    /// Ids of handles currently on loan
    loaned: FxHashSet<u64>,

    /// Parked acquirers, FIFO
    waiters: VecDeque<Arc<Waiter<T>>>,
}

enum Checkout<T> {
    Conn(ConnHandle<T>),
    Wait(Arc<Waiter<T>>),
    Full,
}

enum Handoff<T> {
    Conn(ConnHandle<T>),
    Retry,
    TimedOut,
}

/// Bounded pool of reusable resources for one named backend.
///
/// Invariant: `active + idle <= max_size` at all times.
pub struct Pool<C: Connector> {
    /// Backend name, passed through to the connector
    name: String,

    /// Normalized configuration
    config: PoolConfig,

    /// Backend factory
    connector: Arc<C>,

    /// Mutable state; the single exclusive section of the pool
    state: Mutex<PoolState<C::Conn>>,
}

impl<C: Connector> Pool<C> {
    /// Create an empty pool for `name`.
    pub fn new(name: impl Into<String>, connector: Arc<C>, config: PoolConfig) -> Self {
        Self {
            name: name.into(),
            config: config.normalized(),
            connector,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                active: 0,
                loaned: FxHashSet::default(),
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pool configuration (normalized).
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Acquire a handle, waiting up to `acquire_timeout` for a release when
    /// the pool is at capacity.
    pub fn acquire(&self) -> Result<ConnHandle<C::Conn>, PoolError> {
        let deadline = Instant::now() + self.config.acquire_timeout;

        loop {
            match self.checkout(true)? {
                Checkout::Conn(conn) => return Ok(conn),
                Checkout::Full => unreachable!("checkout(true) queues instead of reporting Full"),
                Checkout::Wait(waiter) => match self.wait_for_handoff(waiter, deadline) {
                    Handoff::Conn(conn) => return Ok(conn),
                    Handoff::Retry => continue,
                    Handoff::TimedOut => {
                        return Err(PoolError::Exhausted {
                            name: self.name.clone(),
                            waited: self.config.acquire_timeout,
                        })
                    }
                },
            }
        }
    }

    /// Acquire a handle without waiting. Returns `Ok(None)` when the pool is
    /// at capacity with nothing idle.
    pub fn try_acquire(&self) -> Result<Option<ConnHandle<C::Conn>>, PoolError> {
        match self.checkout(false)? {
            Checkout::Conn(conn) => Ok(Some(conn)),
            Checkout::Full => Ok(None),
            Checkout::Wait(_) => unreachable!("checkout(false) never queues"),
        }
    }

    /// One pass over the acquire path: reuse idle, grow, or (with `enqueue`)
    /// join the wait queue.
    fn checkout(&self, enqueue: bool) -> Result<Checkout<C::Conn>, PoolError> {
        let mut state = self.state.lock();
        self.reap_stale(&mut state);

        if let Some(idle) = state.idle.pop_front() {
            state.active += 1;
            state.loaned.insert(idle.conn.id());
            return Ok(Checkout::Conn(idle.conn));
        }

        if state.active + state.idle.len() < self.config.max_size {
            // Reserve capacity before connecting so concurrent acquirers
            // cannot overshoot max_size while the connect is in flight.
            state.active += 1;
            drop(state);

            return match self.connector.connect(&self.name) {
                Ok(conn) => {
                    let handle: ConnHandle<C::Conn> = Arc::new(PooledConn::new(conn));
                    self.state.lock().loaned.insert(handle.id());
                    tracing::debug!(pool = %self.name, id = handle.id(), "grew pool");
                    Ok(Checkout::Conn(handle))
                }
                Err(err) => {
                    // The failed create must not count against the pool.
                    // Hand the freed capacity to one parked waiter.
                    let mut state = self.state.lock();
                    state.active -= 1;
                    if let Some(waiter) = state.waiters.pop_front() {
                        waiter.deliver(WaiterSignal::Retry);
                    }
                    Err(PoolError::Connect(err))
                }
            };
        }

        if !enqueue {
            return Ok(Checkout::Full);
        }

        let waiter = Arc::new(Waiter::new());
        state.waiters.push_back(waiter.clone());
        Ok(Checkout::Wait(waiter))
    }

    /// Park until a release (or freed capacity) wakes us, or the deadline
    /// passes.
    fn wait_for_handoff(&self, waiter: Arc<Waiter<C::Conn>>, deadline: Instant) -> Handoff<C::Conn> {
        let mut slot = waiter.slot.lock();
        while slot.is_none() {
            if waiter.condvar.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }

        if let Some(signal) = slot.take() {
            // Whoever delivered also removed us from the queue.
            return match signal {
                WaiterSignal::Conn(conn) => Handoff::Conn(conn),
                WaiterSignal::Retry => Handoff::Retry,
            };
        }
        drop(slot);

        // Timed out. Removal races against an in-flight delivery, so
        // re-check the slot under the state lock before giving up.
        let mut state = self.state.lock();
        let mut slot = waiter.slot.lock();
        if let Some(signal) = slot.take() {
            return match signal {
                WaiterSignal::Conn(conn) => Handoff::Conn(conn),
                WaiterSignal::Retry => Handoff::Retry,
            };
        }
        state.waiters.retain(|queued| !Arc::ptr_eq(queued, &waiter));
        Handoff::TimedOut
    }

    /// Return a loaned handle to the pool.
    ///
    /// The first parked waiter (FIFO) receives the handle directly; otherwise
    /// it joins the idle queue. A handle that is not on loan (released twice,
    /// or never acquired from this pool) is rejected.
    pub fn release(&self, handle: ConnHandle<C::Conn>) -> Result<(), PoolError> {
        let mut state = self.state.lock();

        if !state.loaned.remove(&handle.id()) {
            return Err(PoolError::NotLoaned {
                name: self.name.clone(),
                id: handle.id(),
            });
        }

        if let Some(waiter) = state.waiters.pop_front() {
            // The loan transfers without touching the idle queue.
            state.loaned.insert(handle.id());
            waiter.deliver(WaiterSignal::Conn(handle));
            return Ok(());
        }

        state.active -= 1;
        state.idle.push_back(IdleConn {
            conn: handle,
            idle_since: Instant::now(),
        });
        debug_assert!(state.active + state.idle.len() <= self.config.max_size);
        Ok(())
    }

    /// Drop idle handles past `idle_timeout`, never below `min_idle`.
    fn reap_stale(&self, state: &mut PoolState<C::Conn>) {
        while state.idle.len() > self.config.min_idle {
            match state.idle.front() {
                Some(idle) if idle.idle_since.elapsed() >= self.config.idle_timeout => {
                    let dropped = state.idle.pop_front().expect("front was Some");
                    tracing::debug!(pool = %self.name, id = dropped.conn.id(), "dropped stale idle resource");
                }
                _ => break,
            }
        }
    }

    /// Handles waiting idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Handles currently on loan.
    pub fn active_count(&self) -> usize {
        self.state.lock().active
    }

    /// Parked acquirers.
    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Handles in existence (on loan + idle).
    pub fn size(&self) -> usize {
        let state = self.state.lock();
        state.active + state.idle.len()
    }
}
