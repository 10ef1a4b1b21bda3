//! Per-task context store
//!
//! Every task owns exactly one [`ContextStore`]: a string-keyed map of opaque
//! values that lives from task start (empty) to task end (discarded on both
//! the success and the failure path). The store is a field of the task record,
//! not a global map keyed by a "current id", so a recycled task id can never
//! observe a previous task's entries.
//!
//! The module-level functions operate on the *current* task's store and
//! return `None`/`false` when called outside any task.

use crate::scheduler::current;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::Arc;

/// Opaque value stored in a context store.
pub type ContextValue = Arc<dyn Any + Send + Sync>;

/// String-keyed map of opaque values scoped to one task's lifetime.
#[derive(Default)]
pub struct ContextStore {
    values: FxHashMap<String, ContextValue>,
}

impl ContextStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            values: FxHashMap::default(),
        }
    }

    /// Get the value under `key`, if present.
    pub fn get(&self, key: &str) -> Option<ContextValue> {
        self.values.get(key).cloned()
    }

    /// Get the value under `key` downcast to `T`.
    ///
    /// Returns `None` if the key is absent or holds a value of another type.
    pub fn get_as<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.values
            .get(key)
            .and_then(|value| value.clone().downcast::<T>().ok())
    }

    /// Install or overwrite the value under `key`.
    pub fn set(&mut self, key: impl Into<String>, value: ContextValue) {
        self.values.insert(key.into(), value);
    }

    /// Whether `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Remove and return the value under `key`.
    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        self.values.remove(key)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Get a value from the current task's store.
///
/// Returns `None` outside any task.
pub fn get(key: &str) -> Option<ContextValue> {
    current::with_current(|task| task.with_context(|ctx| ctx.get(key))).flatten()
}

/// Get a value from the current task's store downcast to `T`.
pub fn get_as<T: Any + Send + Sync>(key: &str) -> Option<Arc<T>> {
    current::with_current(|task| task.with_context(|ctx| ctx.get_as::<T>(key))).flatten()
}

/// Install a value into the current task's store.
///
/// Returns `false` (and stores nothing) outside any task.
pub fn set(key: impl Into<String>, value: ContextValue) -> bool {
    current::with_current(|task| task.with_context(|ctx| ctx.set(key, value))).is_some()
}

/// Whether the current task's store holds `key`. `false` outside any task.
pub fn has(key: &str) -> bool {
    current::with_current(|task| task.with_context(|ctx| ctx.has(key))).unwrap_or(false)
}

/// Remove a value from the current task's store.
pub fn remove(key: &str) -> Option<ContextValue> {
    current::with_current(|task| task.with_context(|ctx| ctx.remove(key))).flatten()
}
