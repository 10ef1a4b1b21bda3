//! Lazy pool registry
//!
//! One pool per backend name, constructed on first use and cached for the
//! process lifetime. The map entry is the exclusive construction step:
//! concurrent first access from many tasks builds exactly one pool.

use crate::config::PoolSettings;
use crate::connector::Connector;
use crate::pool::Pool;
use dashmap::DashMap;
use std::sync::Arc;

/// Maps backend names to their pools, creating pools on first use.
pub struct PoolRegistry<C: Connector> {
    /// Shared backend factory
    connector: Arc<C>,

    /// Per-name configuration with a default fallback
    settings: PoolSettings,

    /// Name → pool, keys unique, cached forever
    pools: DashMap<String, Arc<Pool<C>>>,
}

impl<C: Connector> PoolRegistry<C> {
    /// Create a registry over `connector` with the given settings.
    pub fn new(connector: C, settings: PoolSettings) -> Self {
        Self {
            connector: Arc::new(connector),
            settings,
            pools: DashMap::new(),
        }
    }

    /// The pool for `name`, constructed on first call.
    pub fn pool(&self, name: &str) -> Arc<Pool<C>> {
        self.pools
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(pool = name, "creating pool on first use");
                Arc::new(Pool::new(
                    name,
                    self.connector.clone(),
                    self.settings.config_for(name),
                ))
            })
            .clone()
    }

    /// The pool for `name` if it already exists; never constructs.
    pub fn get(&self, name: &str) -> Option<Arc<Pool<C>>> {
        self.pools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of constructed pools.
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether no pool has been constructed yet.
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::connector::ConnectError;
    use std::thread;

    /// Connector whose resources are just the backend name.
    struct NameEcho;

    impl Connector for NameEcho {
        type Conn = String;

        fn connect(&self, name: &str) -> Result<String, ConnectError> {
            Ok(format!("conn-to-{name}"))
        }
    }

    fn test_registry() -> PoolRegistry<NameEcho> {
        let settings = PoolSettings::default().with_pool(
            "replica",
            PoolConfig {
                max_size: 4,
                ..PoolConfig::default()
            },
        );
        PoolRegistry::new(NameEcho, settings)
    }

    #[test]
    fn test_lazy_idempotent_construction() {
        let registry = test_registry();
        assert!(registry.is_empty());
        assert!(registry.get("default").is_none());

        let first = registry.pool("default");
        let second = registry.pool("default");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("default").is_some());
    }

    #[test]
    fn test_per_name_config() {
        let registry = test_registry();

        assert_eq!(registry.pool("replica").config().max_size, 4);
        assert_eq!(registry.pool("default").config().max_size, 10);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_concurrent_first_access_single_pool() {
        let registry = Arc::new(test_registry());

        let mut joins = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            joins.push(thread::spawn(move || registry.pool("default")));
        }

        let pools: Vec<_> = joins.into_iter().map(|j| j.join().unwrap()).collect();
        for pool in &pools[1..] {
            assert!(Arc::ptr_eq(&pools[0], pool));
        }
        assert_eq!(registry.len(), 1);
    }
}
