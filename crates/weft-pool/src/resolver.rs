//! Task-scoped connection resolution
//!
//! The resolver maps a logical backend name to a handle for the *current*
//! task. The first `connection` call in a task acquires from the named pool,
//! caches the handle in the task's context store, and registers a deferred
//! release; every later call for the same name in the same task returns the
//! identical handle. When the task ends, normally or by failure, the
//! deferred release returns each cached handle to its pool.
//!
//! # Ungoverned mode
//!
//! Called outside any task there is no task boundary to scope a cache to:
//! `connection` skips the cache and hands out a fresh loan on every call.
//! The caller owns those loans and releases them through
//! [`Pool::release`](crate::pool::Pool::release).

use crate::connector::Connector;
use crate::error::PoolError;
use crate::pool::{ConnHandle, PooledConn};
use crate::registry::PoolRegistry;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use weft_runtime::context;

/// Reserved context-store key holding the per-task name → handle cache.
const CONNECTIONS_KEY: &str = "weft.pool.connections";

/// Per-task cache, stored behind the reserved context key.
type ConnCache<T> = Mutex<FxHashMap<String, ConnHandle<T>>>;

/// Resolves logical backend names to task-cached pooled handles.
pub struct ConnectionResolver<C: Connector> {
    /// Pool registry backing cache misses
    registry: Arc<PoolRegistry<C>>,

    /// The default connection name; process-wide, not task-scoped
    default_name: RwLock<String>,

    /// Explicitly registered handles (pre-wired resources, test doubles);
    /// independent of pooling and per-task caching
    registered: RwLock<FxHashMap<String, ConnHandle<C::Conn>>>,
}

impl<C: Connector> ConnectionResolver<C> {
    /// Create a resolver over `registry` with default name `"default"`.
    pub fn new(registry: Arc<PoolRegistry<C>>) -> Self {
        Self {
            registry,
            default_name: RwLock::new("default".to_string()),
            registered: RwLock::new(FxHashMap::default()),
        }
    }

    /// The registry backing this resolver.
    pub fn registry(&self) -> &Arc<PoolRegistry<C>> {
        &self.registry
    }

    /// Get a connection handle for `name` (or the default name).
    ///
    /// Within a task this returns the task's cached handle for `name`,
    /// acquiring and caching one on first use; the same task sees the
    /// identical handle until it ends. Outside any task every call acquires
    /// a fresh handle (see the module docs on ungoverned mode).
    pub fn connection(&self, name: Option<&str>) -> Result<ConnHandle<C::Conn>, PoolError> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.default_name.read().clone(),
        };

        if !weft_runtime::in_task() {
            return self.registry.pool(&name).acquire();
        }

        let cache = match context::get_as::<ConnCache<C::Conn>>(CONNECTIONS_KEY) {
            Some(cache) => cache,
            None => {
                let cache: Arc<ConnCache<C::Conn>> = Arc::new(Mutex::new(FxHashMap::default()));
                context::set(CONNECTIONS_KEY, cache.clone());
                cache
            }
        };

        if let Some(handle) = cache.lock().get(&name) {
            return Ok(handle.clone());
        }

        let pool = self.registry.pool(&name);
        let handle = pool.acquire()?;
        cache.lock().insert(name.clone(), handle.clone());

        // Return the loan when the owning task ends, however it ends.
        let deferred = handle.clone();
        weft_runtime::defer(move || {
            if let Err(err) = pool.release(deferred) {
                tracing::warn!("deferred release failed: {err}");
            }
        });

        Ok(handle)
    }

    /// Register `conn` directly under `name`, bypassing the pools.
    ///
    /// Registered handles never participate in loan accounting or per-task
    /// caching; they exist for pre-wired resources such as test doubles.
    pub fn add_connection(&self, name: impl Into<String>, conn: C::Conn) {
        self.registered
            .write()
            .insert(name.into(), Arc::new(PooledConn::new(conn)));
    }

    /// Whether a handle was explicitly registered under `name`.
    pub fn has_connection(&self, name: &str) -> bool {
        self.registered.read().contains_key(name)
    }

    /// The explicitly registered handle under `name`, if any.
    pub fn registered_connection(&self, name: &str) -> Option<ConnHandle<C::Conn>> {
        self.registered.read().get(name).cloned()
    }

    /// The default connection name.
    pub fn default_connection(&self) -> String {
        self.default_name.read().clone()
    }

    /// Set the default connection name (process-wide).
    pub fn set_default_connection(&self, name: impl Into<String>) {
        *self.default_name.write() = name.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, PoolSettings};
    use crate::connector::ConnectError;

    struct NameEcho;

    impl Connector for NameEcho {
        type Conn = String;

        fn connect(&self, name: &str) -> Result<String, ConnectError> {
            Ok(format!("conn-to-{name}"))
        }
    }

    fn test_resolver() -> ConnectionResolver<NameEcho> {
        let settings = PoolSettings::new(PoolConfig {
            min_idle: 0,
            ..PoolConfig::default()
        });
        ConnectionResolver::new(Arc::new(PoolRegistry::new(NameEcho, settings)))
    }

    #[test]
    fn test_default_name_accessors() {
        let resolver = test_resolver();
        assert_eq!(resolver.default_connection(), "default");

        resolver.set_default_connection("replica");
        assert_eq!(resolver.default_connection(), "replica");
    }

    #[test]
    fn test_explicit_registration() {
        let resolver = test_resolver();
        assert!(!resolver.has_connection("wired"));
        assert!(resolver.registered_connection("wired").is_none());

        resolver.add_connection("wired", "handmade".to_string());
        assert!(resolver.has_connection("wired"));
        let handle = resolver.registered_connection("wired").unwrap();
        assert_eq!(handle.conn(), "handmade");

        // Registration bypasses the pools entirely.
        assert!(resolver.registry().is_empty());
    }

    #[test]
    fn test_registered_handle_rejected_by_pool() {
        let resolver = test_resolver();
        resolver.add_connection("wired", "handmade".to_string());

        let handle = resolver.registered_connection("wired").unwrap();
        let pool = resolver.registry().pool("default");
        assert!(matches!(
            pool.release(handle),
            Err(PoolError::NotLoaned { .. })
        ));
    }

    #[test]
    fn test_ungoverned_mode_fresh_handles() {
        // This test runs on a plain test thread: no task is active.
        assert!(!weft_runtime::in_task());

        let resolver = test_resolver();
        let a = resolver.connection(None).unwrap();
        let b = resolver.connection(None).unwrap();
        assert_ne!(a.id(), b.id());

        let pool = resolver.registry().pool("default");
        assert_eq!(pool.active_count(), 2);

        // Ungoverned loans are the caller's to return.
        pool.release(a).unwrap();
        pool.release(b).unwrap();
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_named_connection_uses_named_pool() {
        let resolver = test_resolver();
        let handle = resolver.connection(Some("replica")).unwrap();
        assert_eq!(handle.conn(), "conn-to-replica");

        assert!(resolver.registry().get("replica").is_some());
        assert!(resolver.registry().get("default").is_none());
    }
}
