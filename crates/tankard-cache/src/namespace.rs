//! Namespace manager: one namespace on one backend, with per-key locking.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::backend::Backend;
use crate::container::Container;
use crate::error::{Error, Result};
use crate::lock::LockTable;

/// Result of a recomputation attempt.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    /// The producer ran and its container was stored.
    Created(Container),
    /// Another writer refreshed the key while this caller waited; the
    /// producer was not run.
    Existing(Container),
}

impl WriteOutcome {
    pub fn container(&self) -> &Container {
        match self {
            WriteOutcome::Created(c) | WriteOutcome::Existing(c) => c,
        }
    }

    pub fn into_container(self) -> Container {
        match self {
            WriteOutcome::Created(c) | WriteOutcome::Existing(c) => c,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    Block,
    NoWait,
}

/// Gatekeeper for one namespace on one backend.
///
/// Readers take the key's shared access lock. Writers first take the key's
/// creation lock (and, for file-based backends, a cross-process lock file),
/// re-read the key, and only run the producer if it is still not fresh. The
/// producer runs with the creation lock held: it must not call back into the
/// same key of the same cache.
#[derive(Debug)]
pub struct NamespaceManager {
    namespace: String,
    backend: Arc<dyn Backend>,
    locks: Arc<LockTable>,
    lock_timeout: Option<Duration>,
}

impl NamespaceManager {
    pub fn new(
        namespace: impl Into<String>,
        backend: Arc<dyn Backend>,
        locks: Arc<LockTable>,
        lock_timeout: Option<Duration>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            backend,
            locks,
            lock_timeout,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn locks(&self) -> &Arc<LockTable> {
        &self.locks
    }

    /// Current container for `key`, if any.
    pub fn read(&self, key: &str) -> Result<Option<Container>> {
        let handle = self.locks.handle(&self.namespace, key);
        let _access = handle.read();
        self.backend.get(&self.namespace, key)
    }

    /// Recompute `key` under its write lock.
    ///
    /// Waits for the creation lock up to the configured timeout, then returns
    /// [`Error::LockTimeout`]. `is_fresh` decides whether a container written
    /// by another caller in the meantime can be returned as is.
    pub fn write<P>(
        &self,
        key: &str,
        is_fresh: impl Fn(&Container) -> bool,
        producer: P,
    ) -> Result<WriteOutcome>
    where
        P: FnOnce(Option<&Container>) -> Result<Container>,
    {
        self.write_inner(key, is_fresh, producer, Wait::Block)?
            .ok_or_else(|| Error::LockTimeout {
                key: key.to_string(),
                waited: self.lock_timeout.unwrap_or_default(),
            })
    }

    /// Like [`NamespaceManager::write`], but returns `Ok(None)` immediately if
    /// another caller is already recomputing `key`.
    pub fn try_write<P>(
        &self,
        key: &str,
        is_fresh: impl Fn(&Container) -> bool,
        producer: P,
    ) -> Result<Option<WriteOutcome>>
    where
        P: FnOnce(Option<&Container>) -> Result<Container>,
    {
        self.write_inner(key, is_fresh, producer, Wait::NoWait)
    }

    fn write_inner<P>(
        &self,
        key: &str,
        is_fresh: impl Fn(&Container) -> bool,
        producer: P,
        wait: Wait,
    ) -> Result<Option<WriteOutcome>>
    where
        P: FnOnce(Option<&Container>) -> Result<Container>,
    {
        let handle = self.locks.handle(&self.namespace, key);
        let started = Instant::now();

        let creation = match wait {
            Wait::Block => handle.creation(self.lock_timeout),
            Wait::NoWait => handle.try_creation(),
        };
        let Some(_creation) = creation else {
            return match wait {
                Wait::Block => {
                    let waited = started.elapsed();
                    debug!(namespace = %self.namespace, key = %key, waited = ?waited, "Write lock wait timed out");
                    Err(Error::LockTimeout {
                        key: key.to_string(),
                        waited,
                    })
                }
                Wait::NoWait => {
                    trace!(namespace = %self.namespace, key = %key, "Key already being recomputed");
                    Ok(None)
                }
            };
        };

        let external_timeout = match wait {
            Wait::Block => self
                .lock_timeout
                .map(|t| t.saturating_sub(started.elapsed())),
            Wait::NoWait => Some(Duration::ZERO),
        };
        let _external = match self
            .backend
            .lock_key(&self.namespace, key, external_timeout)
        {
            Ok(lock) => lock,
            Err(Error::LockTimeout { .. }) if wait == Wait::NoWait => return Ok(None),
            Err(e) => return Err(e),
        };

        // Double check: another writer may have refreshed the key while we waited.
        let current = {
            let _access = handle.read();
            self.backend.get(&self.namespace, key)?
        };
        if let Some(existing) = current.as_ref().filter(|c| is_fresh(*c)) {
            debug!(
                namespace = %self.namespace,
                key = %key,
                version = existing.version(),
                "Key refreshed by another writer, skipping recomputation"
            );
            return Ok(Some(WriteOutcome::Existing(existing.clone())));
        }

        debug!(namespace = %self.namespace, key = %key, "Recomputing value");
        let container = producer(current.as_ref())?;
        {
            let _access = handle.write();
            self.backend.set(&self.namespace, &container)?;
        }
        trace!(
            namespace = %self.namespace,
            key = %key,
            version = container.version(),
            elapsed = ?started.elapsed(),
            "Value stored"
        );
        Ok(Some(WriteOutcome::Created(container)))
    }

    /// Replace the container for `key` without recomputation.
    ///
    /// `build` sees the current container and returns the replacement, or
    /// `None` to leave the key untouched. Runs under the key's exclusive
    /// access lock, so concurrent stores to one key are totally ordered.
    pub fn update<B>(&self, key: &str, build: B) -> Result<Option<Container>>
    where
        B: FnOnce(Option<&Container>) -> Result<Option<Container>>,
    {
        let handle = self.locks.handle(&self.namespace, key);
        let _access = handle.write();
        let current = self.backend.get(&self.namespace, key)?;
        let next = build(current.as_ref())?;
        if let Some(container) = &next {
            self.backend.set(&self.namespace, container)?;
        }
        Ok(next)
    }

    /// Remove `key`. Returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let handle = self.locks.handle(&self.namespace, key);
        let _access = handle.write();
        self.backend.delete(&self.namespace, key)
    }

    pub fn has(&self, key: &str) -> Result<bool> {
        let handle = self.locks.handle(&self.namespace, key);
        let _access = handle.read();
        self.backend.has(&self.namespace, key)
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        self.backend.keys(&self.namespace)
    }

    /// Remove every key in the namespace.
    pub fn clear(&self) -> Result<()> {
        self.backend.clear(&self.namespace)?;
        debug!(namespace = %self.namespace, "Namespace cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager(lock_timeout: Option<Duration>) -> NamespaceManager {
        NamespaceManager::new(
            "ns",
            Arc::new(MemoryBackend::new()),
            Arc::new(LockTable::new()),
            lock_timeout,
        )
    }

    fn produce(key: &str, v: i64) -> impl FnOnce(Option<&Container>) -> Result<Container> {
        let key = key.to_string();
        move |prev| Ok(Container::replace(prev, key, serde_json::json!(v), Utc::now()))
    }

    #[test]
    fn test_write_then_read() {
        let m = manager(None);
        let out = m.write("k", |_| false, produce("k", 7)).unwrap();

        assert!(matches!(out, WriteOutcome::Created(_)));
        assert_eq!(
            m.read("k").unwrap().unwrap().value(),
            &serde_json::json!(7)
        );
        assert!(m.locks().is_empty());
    }

    #[test]
    fn test_fresh_value_skips_producer() {
        let m = manager(None);
        m.write("k", |_| false, produce("k", 1)).unwrap();

        let calls = AtomicUsize::new(0);
        let out = m
            .write(
                "k",
                |_| true,
                |prev| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    produce("k", 2)(prev)
                },
            )
            .unwrap();

        assert!(matches!(out, WriteOutcome::Existing(_)));
        assert_eq!(out.container().value(), &serde_json::json!(1));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_write_times_out_while_key_recomputed() {
        let m = manager(Some(Duration::from_millis(10)));
        let handle = m.locks().handle("ns", "k");
        let _held = handle.creation(None).unwrap();

        let err = m.write("k", |_| false, produce("k", 1)).unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));

        let skipped = m.try_write("k", |_| false, produce("k", 1)).unwrap();
        assert!(skipped.is_none());
    }

    #[test]
    fn test_other_keys_do_not_block() {
        let m = manager(Some(Duration::from_millis(10)));
        let handle = m.locks().handle("ns", "busy");
        let _held = handle.creation(None).unwrap();

        assert!(m.write("free", |_| false, produce("free", 1)).is_ok());
    }

    #[test]
    fn test_update_and_remove() {
        let m = manager(None);
        let stored = m
            .update("k", |prev| {
                assert!(prev.is_none());
                Ok(Some(Container::new("k", serde_json::json!("v"), Utc::now())))
            })
            .unwrap();
        assert!(stored.is_some());

        let untouched = m.update("k", |_| Ok(None)).unwrap();
        assert!(untouched.is_none());
        assert!(m.has("k").unwrap());

        assert!(m.remove("k").unwrap());
        assert!(!m.has("k").unwrap());
    }
}
