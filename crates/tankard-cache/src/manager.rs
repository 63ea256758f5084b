//! Cache registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{self, Backend};
use crate::cache::Cache;
use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, StorageKey};
use crate::error::Result;
use crate::lock::LockTable;
use crate::namespace::NamespaceManager;

/// Backend handle and lock table for one physical storage location.
#[derive(Debug, Clone)]
struct Storage {
    backend: Arc<dyn Backend>,
    locks: Arc<LockTable>,
    /// I/O timeout the backend was opened with.
    io_timeout: Duration,
}

impl Storage {
    fn open(config: &CacheConfig) -> Result<Self> {
        Ok(Self {
            backend: backend::open(config)?,
            locks: Arc::new(LockTable::new()),
            io_timeout: config.io_timeout,
        })
    }
}

#[derive(Debug, Default)]
struct Registry {
    caches: HashMap<(String, CacheConfig), Arc<Cache>>,
    storages: HashMap<StorageKey, Storage>,
}

/// Builds caches on first request and hands out the same instance afterwards.
///
/// Caches are memoized by `(name, normalized config)`. Every cache that points
/// at the same physical storage shares one backend handle and one lock table,
/// so two caches over the same namespace and storage always coordinate.
///
/// Asking for an existing name with a different configuration yields a
/// separate cache. Both caches then share the name only nominally; if they
/// point at different storage they will not see each other's values.
///
/// There is no process-wide instance. Build one at startup and pass it to
/// whatever needs caches.
///
/// # Example
///
/// ```rust
/// use tankard_cache::{CacheConfig, CacheManager};
///
/// let manager = CacheManager::new(CacheConfig::new());
/// let cache = manager.get_cache("users").unwrap();
/// cache.set_value("a", &1).unwrap();
/// assert_eq!(cache.get_value::<i32>("a").unwrap(), 1);
/// ```
#[derive(Debug)]
pub struct CacheManager {
    defaults: CacheConfig,
    clock: Arc<dyn Clock>,
    registry: Mutex<Registry>,
}

impl CacheManager {
    /// Create a manager whose caches default to `defaults`.
    pub fn new(defaults: CacheConfig) -> Self {
        Self {
            defaults,
            clock: Arc::new(SystemClock),
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Use `clock` for every cache built from now on.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the default configuration.
    pub fn defaults(&self) -> &CacheConfig {
        &self.defaults
    }

    /// Get or build the cache for `name` with the default configuration.
    pub fn get_cache(&self, name: &str) -> Result<Arc<Cache>> {
        self.get_cache_with(name, &self.defaults)
    }

    /// Get or build the cache for `name` with `config`.
    ///
    /// Backend construction errors surface here, on first use. The backend is
    /// opened without holding the registry lock; if two callers race to open
    /// the same storage, the first one registered wins and the other handle is
    /// dropped.
    ///
    /// The storage's backend is opened once, with the first configuration
    /// that reaches it. A later configuration naming the same storage with a
    /// different `io_timeout` gets the existing backend, a warning is logged,
    /// and the returned cache reports the timeout actually in effect.
    pub fn get_cache_with(&self, name: &str, config: &CacheConfig) -> Result<Arc<Cache>> {
        let mut config = config.normalized();
        let key = (name.to_string(), config.clone());
        let storage_key = config.storage_key();

        let existing = {
            let registry = self.registry.lock();
            if let Some(cache) = registry.caches.get(&key) {
                return Ok(Arc::clone(cache));
            }
            registry.storages.get(&storage_key).cloned()
        };
        let candidate = match existing {
            Some(storage) => storage,
            None => Storage::open(&config)?,
        };

        let mut registry = self.registry.lock();
        if let Some(cache) = registry.caches.get(&key) {
            return Ok(Arc::clone(cache));
        }

        if registry.caches.keys().any(|(n, _)| n == name) {
            warn!(
                namespace = %name,
                backend = %config.backend,
                "Cache name already registered with a different configuration; creating a distinct cache"
            );
        }

        let storage = registry
            .storages
            .entry(storage_key)
            .or_insert(candidate)
            .clone();

        if storage.io_timeout != config.io_timeout {
            warn!(
                namespace = %name,
                backend = %config.backend,
                requested = ?config.io_timeout,
                in_effect = ?storage.io_timeout,
                "Storage already open with a different io_timeout; reusing it"
            );
            config.io_timeout = storage.io_timeout;
        }

        let manager = NamespaceManager::new(name, storage.backend, storage.locks, config.lock_timeout);
        let cache = Arc::new(Cache::new(manager, config, Arc::clone(&self.clock)));
        registry.caches.insert(key, Arc::clone(&cache));

        info!(namespace = %name, backend = %cache.config().backend, "Cache created");
        Ok(cache)
    }

    /// Number of caches built so far.
    pub fn len(&self) -> usize {
        self.registry.lock().caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().caches.is_empty()
    }

    /// Names of the caches built so far, sorted and deduplicated.
    pub fn names(&self) -> Vec<String> {
        let registry = self.registry.lock();
        let mut names: Vec<String> = registry.caches.keys().map(|(n, _)| n.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    /// Drop every memoized cache and storage handle.
    ///
    /// Caches already handed out keep working against their own handles.
    pub fn reset(&self) {
        let mut registry = self.registry.lock();
        let count = registry.caches.len();
        registry.caches.clear();
        registry.storages.clear();
        debug!(count, "Cache registry reset");
    }
}
