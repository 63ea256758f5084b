//! The user-facing cache: one namespace plus expiration policy.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::config::{BackendKind, CacheConfig, RefreshPolicy};
use crate::container::Container;
use crate::error::{Error, Result};
use crate::expiry::Expiration;
use crate::namespace::{NamespaceManager, WriteOutcome};

/// A namespaced cache with create-on-miss and create-on-stale semantics.
///
/// Obtain one from [`crate::CacheManager::get_cache`]. Values are stored as
/// JSON, so any `Serialize + DeserializeOwned` type can be cached.
///
/// Create functions run while the key's creation lock is held. They must not
/// read or write the same key of the same cache, or they deadlock (or time
/// out, if a lock timeout is configured).
#[derive(Debug)]
pub struct Cache {
    manager: NamespaceManager,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    recomputations: AtomicU64,
    lock_timeouts: AtomicU64,
}

impl Cache {
    pub(crate) fn new(manager: NamespaceManager, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            manager,
            config,
            clock,
            counters: Counters::default(),
        }
    }

    /// The namespace this cache reads and writes.
    pub fn namespace(&self) -> &str {
        self.manager.namespace()
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Look up `key` using the default expiration.
    ///
    /// Returns [`Error::KeyNotFound`] on a miss. A stale value is returned as
    /// is unless strict expiry is configured, in which case
    /// [`Error::KeyExpired`] is returned.
    pub fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.lookup_value(key, None)
    }

    /// Look up `key` with an explicit expiration.
    pub fn get_value_with<T: DeserializeOwned>(&self, key: &str, expire: Expiration) -> Result<T> {
        self.lookup_value(key, Some(expire))
    }

    fn lookup_value<T: DeserializeOwned>(&self, key: &str, expire: Option<Expiration>) -> Result<T> {
        match self.lookup(key, expire)? {
            Lookup::Fresh(container) => container.decode(),
            Lookup::Missing => Err(Error::KeyNotFound(key.to_string())),
            Lookup::Stale(_) if self.config.strict_expiry => Err(Error::KeyExpired(key.to_string())),
            Lookup::Stale(container) => container.decode(),
        }
    }

    /// Look up `key`, calling `create` on a miss or when the value is stale.
    ///
    /// However many threads call this concurrently for one key, `create` runs
    /// at most once per refresh; the others wait for (or, under
    /// [`RefreshPolicy::ServeStale`], skip) that recomputation.
    pub fn get_or_create<T, F>(&self, key: &str, create: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        self.try_get_or_create(key, None, || Ok::<T, Infallible>(create()))
    }

    /// [`Cache::get_or_create`] with an explicit expiration.
    pub fn get_or_create_with<T, F>(&self, key: &str, expire: Expiration, create: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        self.try_get_or_create(key, Some(expire), || Ok::<T, Infallible>(create()))
    }

    /// [`Cache::get_or_create`] with a fallible create function and optional
    /// explicit expiration.
    ///
    /// A failing `create` stores nothing and surfaces as
    /// [`Error::CreateFailed`].
    pub fn try_get_or_create<T, E, F>(
        &self,
        key: &str,
        expire: Option<Expiration>,
        create: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let stale = match self.lookup(key, expire)? {
            Lookup::Fresh(container) => return container.decode(),
            Lookup::Stale(container) => Some(container),
            Lookup::Missing => None,
        };

        let mut produced: Option<T> = None;
        let is_fresh = |c: &Container| !self.is_stale(c, expire);
        let producer = |prev: Option<&Container>| -> Result<Container> {
            let value = create().map_err(|e| Error::CreateFailed {
                key: key.to_string(),
                source: e.into(),
            })?;
            let container = Container::replace(prev, key, serde_json::to_value(&value)?, self.clock.now())
                .with_expire_after(prev.and_then(Container::expire_after));
            produced = Some(value);
            Ok(container)
        };

        let outcome = match (&stale, self.config.refresh) {
            (Some(stale), RefreshPolicy::ServeStale) => {
                match self.manager.try_write(key, is_fresh, producer)? {
                    Some(outcome) => outcome,
                    None => {
                        debug!(namespace = %self.namespace(), key = %key, "Serving stale value while another caller recomputes");
                        return stale.decode();
                    }
                }
            }
            _ => self
                .manager
                .write(key, is_fresh, producer)
                .inspect_err(|e| {
                    if matches!(e, Error::LockTimeout { .. }) {
                        self.counters.lock_timeouts.fetch_add(1, Ordering::Relaxed);
                    }
                })?,
        };

        match outcome {
            WriteOutcome::Created(container) => {
                self.counters.recomputations.fetch_add(1, Ordering::Relaxed);
                match produced {
                    Some(value) => Ok(value),
                    None => container.decode(),
                }
            }
            WriteOutcome::Existing(container) => container.decode(),
        }
    }

    /// Read `key` and classify it, updating hit/miss counters.
    fn lookup(&self, key: &str, expire: Option<Expiration>) -> Result<Lookup> {
        match self.manager.read(key)? {
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(namespace = %self.namespace(), key = %key, "Cache miss");
                Ok(Lookup::Missing)
            }
            Some(container) if self.is_stale(&container, expire) => {
                self.counters.stale.fetch_add(1, Ordering::Relaxed);
                debug!(namespace = %self.namespace(), key = %key, version = container.version(), "Cached value is stale");
                Ok(Lookup::Stale(container))
            }
            Some(container) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                trace!(namespace = %self.namespace(), key = %key, "Cache hit");
                Ok(Lookup::Fresh(container))
            }
        }
    }

    fn is_stale(&self, container: &Container, expire: Option<Expiration>) -> bool {
        Expiration::resolve(expire, container, self.config.expire)
            .is_stale(container.created_at(), self.clock.now())
    }

    /// Store `value` under `key`.
    pub fn set_value<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.store(key, value, None)
    }

    /// Store `value` under `key` with its own expiration, used by reads that
    /// do not name one.
    pub fn set_value_with<T: Serialize>(&self, key: &str, value: &T, expire: Duration) -> Result<()> {
        self.store(key, value, Some(expire))
    }

    fn store<T: Serialize>(&self, key: &str, value: &T, expire: Option<Duration>) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let now = self.clock.now();
        self.manager.update(key, |prev| {
            Ok(Some(
                Container::replace(prev, key, value, now).with_expire_after(expire),
            ))
        })?;
        trace!(namespace = %self.namespace(), key = %key, "Value set");
        Ok(())
    }

    /// Record an access to `key` without changing its value or age.
    /// Returns `false` if the key is absent.
    pub fn touch(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        let touched = self
            .manager
            .update(key, |prev| Ok(prev.map(|c| c.touched(now))))?;
        Ok(touched.is_some())
    }

    /// Remove `key`. Returns whether it existed.
    pub fn remove_value(&self, key: &str) -> Result<bool> {
        let removed = self.manager.remove(key)?;
        debug!(namespace = %self.namespace(), key = %key, removed, "Value removed");
        Ok(removed)
    }

    /// Whether `key` is present, fresh or not.
    pub fn has_key(&self, key: &str) -> Result<bool> {
        self.manager.has(key)
    }

    /// The raw container for `key`, without staleness checks.
    pub fn get_container(&self, key: &str) -> Result<Option<Container>> {
        self.manager.read(key)
    }

    /// Keys currently stored in this namespace.
    pub fn keys(&self) -> Result<Vec<String>> {
        self.manager.keys()
    }

    /// Remove every key in this namespace.
    pub fn clear(&self) -> Result<()> {
        self.manager.clear()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            namespace: self.namespace().to_string(),
            backend: self.manager.backend().kind(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stale: self.counters.stale.load(Ordering::Relaxed),
            recomputations: self.counters.recomputations.load(Ordering::Relaxed),
            lock_timeouts: self.counters.lock_timeouts.load(Ordering::Relaxed),
            active_locks: self.manager.locks().len(),
        }
    }
}

enum Lookup {
    Fresh(Container),
    Stale(Container),
    Missing,
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Namespace name.
    pub namespace: String,

    /// Backend kind.
    pub backend: BackendKind,

    /// Reads answered from a fresh value.
    pub hits: u64,

    /// Reads that found no value.
    pub misses: u64,

    /// Reads that found a stale value.
    pub stale: u64,

    /// Create function invocations whose result was stored.
    pub recomputations: u64,

    /// Writers that gave up waiting for a key lock.
    pub lock_timeouts: u64,

    /// Live entries in the lock table shared by this storage.
    pub active_locks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::clock::ManualClock;
    use crate::lock::LockTable;
    use std::sync::atomic::AtomicUsize;

    fn cache_with(config: CacheConfig) -> (Cache, ManualClock) {
        let clock = ManualClock::default();
        let manager = NamespaceManager::new(
            "test",
            Arc::new(MemoryBackend::new()),
            Arc::new(LockTable::new()),
            config.lock_timeout,
        );
        (Cache::new(manager, config, Arc::new(clock.clone())), clock)
    }

    fn cache() -> (Cache, ManualClock) {
        cache_with(CacheConfig::new())
    }

    #[test]
    fn test_set_and_get() {
        let (cache, _) = cache();
        cache.set_value("a", &vec![1, 2, 3]).unwrap();

        let v: Vec<i32> = cache.get_value("a").unwrap();
        assert_eq!(v, vec![1, 2, 3]);
    }

    #[test]
    fn test_not_found() {
        let (cache, _) = cache();
        let result = cache.get_value::<i32>("nonexistent");
        assert!(matches!(result, Err(Error::KeyNotFound(_))));
    }

    #[test]
    fn test_create_on_miss_runs_once() {
        let (cache, _) = cache();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let v: String = cache
                .get_or_create("k", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    "made".to_string()
                })
                .unwrap();
            assert_eq!(v, "made");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let (cache, clock) = cache();
        let ten = Expiration::After(Duration::from_secs(10));

        let first: u32 = cache.get_or_create_with("k", ten, || 1).unwrap();
        clock.advance(Duration::from_millis(9_999));
        let cached: u32 = cache.get_or_create_with("k", ten, || 2).unwrap();
        clock.advance(Duration::from_millis(1));
        let refreshed: u32 = cache.get_or_create_with("k", ten, || 3).unwrap();

        assert_eq!((first, cached, refreshed), (1, 1, 3));
        assert_eq!(cache.get_container("k").unwrap().unwrap().version(), 2);
    }

    #[test]
    fn test_zero_expiry_always_recomputes() {
        let (cache, _) = cache();
        let zero = Expiration::After(Duration::ZERO);

        let a: u32 = cache.get_or_create_with("k", zero, || 1).unwrap();
        let b: u32 = cache.get_or_create_with("k", zero, || 2).unwrap();
        assert_eq!((a, b), (1, 2));
    }

    #[test]
    fn test_stale_fallback_and_strict_expiry() {
        let config = CacheConfig::new().with_expire(Duration::from_secs(5));
        let (lenient, clock) = cache_with(config.clone());
        lenient.set_value("k", &"old").unwrap();
        clock.advance(Duration::from_secs(5));
        let v: String = lenient.get_value("k").unwrap();
        assert_eq!(v, "old");

        let (strict, clock) = cache_with(config.with_strict_expiry(true));
        strict.set_value("k", &"old").unwrap();
        clock.advance(Duration::from_secs(5));
        let err = strict.get_value::<String>("k").unwrap_err();
        assert!(matches!(err, Error::KeyExpired(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_per_call_never_overrides_default() {
        let (cache, clock) = cache_with(
            CacheConfig::new()
                .with_expire(Duration::from_secs(1))
                .with_strict_expiry(true),
        );
        cache.set_value("k", &1).unwrap();
        clock.advance(Duration::from_secs(60));

        let v: i32 = cache.get_value_with("k", Expiration::Never).unwrap();
        assert_eq!(v, 1);
    }

    #[test]
    fn test_stored_expiration_survives_recompute() {
        let (cache, clock) = cache();
        cache
            .set_value_with("k", &1, Duration::from_secs(30))
            .unwrap();
        clock.advance(Duration::from_secs(30));

        let v: i32 = cache.get_or_create("k", || 2).unwrap();
        assert_eq!(v, 2);
        assert_eq!(
            cache.get_container("k").unwrap().unwrap().expire_after(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_failed_create_stores_nothing() {
        let (cache, _) = cache();
        let err = cache
            .try_get_or_create::<i32, _, _>("k", None, || Err("db down"))
            .unwrap_err();

        assert!(matches!(err, Error::CreateFailed { .. }));
        assert!(!cache.has_key("k").unwrap());
    }

    #[test]
    fn test_remove_then_create() {
        let (cache, _) = cache();
        cache.set_value("a", &1).unwrap();
        assert_eq!(cache.get_value::<i32>("a").unwrap(), 1);

        assert!(cache.remove_value("a").unwrap());
        assert_eq!(cache.get_or_create("a", || 2).unwrap(), 2);
    }

    #[test]
    fn test_clear_twice() {
        let (cache, _) = cache();
        cache.set_value("a", &1).unwrap();
        cache.set_value("b", &2).unwrap();

        cache.clear().unwrap();
        assert!(cache.keys().unwrap().is_empty());
        cache.clear().unwrap();
        assert!(cache.keys().unwrap().is_empty());
    }

    #[test]
    fn test_touch_keeps_age() {
        let (cache, clock) = cache();
        cache.set_value("k", &1).unwrap();
        let created = cache.get_container("k").unwrap().unwrap().created_at();

        clock.advance(Duration::from_secs(3));
        assert!(cache.touch("k").unwrap());
        assert!(!cache.touch("missing").unwrap());

        let c = cache.get_container("k").unwrap().unwrap();
        assert_eq!(c.created_at(), created);
        assert_eq!(c.accessed_at(), clock.now());
    }

    #[test]
    fn test_stats() {
        let (cache, clock) = cache_with(CacheConfig::new().with_expire(Duration::from_secs(1)));
        let _ = cache.get_value::<i32>("k");
        cache.get_or_create("k", || 1).unwrap();
        cache.get_value::<i32>("k").unwrap();
        clock.advance(Duration::from_secs(1));
        cache.get_or_create("k", || 2).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.namespace, "test");
        assert_eq!(stats.backend, BackendKind::Memory);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.recomputations, 2);
        assert_eq!(stats.active_locks, 0);
    }
}
