//! Pluggable storage backends.
//!
//! Every medium implements [`Backend`], a small capability set over
//! `(namespace, key) -> Container` records. A backend handle is shared by all
//! caches that point at the same physical storage, so implementations must be
//! `Send + Sync` and safe under concurrent use.
//!
//! | Variant | Cross-process visibility |
//! |---------|--------------------------|
//! | [`MemoryBackend`] | none, process-local |
//! | [`FileBackend`] | immediate after `set` returns (atomic rename) |
//! | [`DbmBackend`] | immediate after `set` returns (atomic rename of the namespace file) |
//! | [`MemcachedBackend`] | immediate, subject to server eviction |
//! | [`DatabaseBackend`] | immediate after commit |
//!
//! All variants give read-your-writes within a process. A medium that cannot
//! be reached reports [`Error::BackendUnavailable`]; nothing falls back to
//! previously read data.

mod database;
mod dbm;
mod file;
mod lockfile;
mod memcached;
mod memory;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::{BackendKind, CacheConfig};
use crate::container::Container;
use crate::error::{Error, Result};

pub use database::DatabaseBackend;
pub use dbm::DbmBackend;
pub use file::FileBackend;
pub use lockfile::LockFile;
pub use memcached::MemcachedBackend;
pub use memory::MemoryBackend;

/// Storage contract every backend satisfies.
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Which medium this is.
    fn kind(&self) -> BackendKind;

    /// Fetch the container for `key`, or `None` on a miss.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Container>>;

    /// Store `container` under its key, replacing any previous one.
    fn set(&self, namespace: &str, container: &Container) -> Result<()>;

    /// Remove `key`. Returns whether it existed.
    fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

    /// Whether `key` is present.
    fn has(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self.get(namespace, key)?.is_some())
    }

    /// Remove every key in `namespace`. Clearing an empty namespace succeeds.
    fn clear(&self, namespace: &str) -> Result<()>;

    /// List the keys in `namespace`.
    fn keys(&self, _namespace: &str) -> Result<Vec<String>> {
        Err(Error::Unsupported {
            backend: self.kind().as_str(),
            operation: "key enumeration",
        })
    }

    /// Take a cross-process lock for recomputing `key`.
    ///
    /// Backends without a shared lock medium return `Ok(None)`; in-process
    /// exclusion is handled by the namespace lock table either way.
    fn lock_key(
        &self,
        _namespace: &str,
        _key: &str,
        _timeout: Option<Duration>,
    ) -> Result<Option<LockFile>> {
        Ok(None)
    }
}

/// Construct the backend selected by `config`.
pub fn open(config: &CacheConfig) -> Result<Arc<dyn Backend>> {
    config.validate()?;
    let config = config.normalized();

    let backend: Arc<dyn Backend> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::File => Arc::new(FileBackend::new(
            required_dir(&config.data_dir)?,
            required_dir(&config.lock_dir)?,
        )),
        BackendKind::Dbm => Arc::new(DbmBackend::new(
            required_dir(&config.data_dir)?,
            required_dir(&config.lock_dir)?,
            config.io_timeout,
        )),
        BackendKind::Memcached => Arc::new(MemcachedBackend::new(
            config.url.as_deref().unwrap_or_default(),
            config.io_timeout,
        )?),
        BackendKind::Database => Arc::new(DatabaseBackend::open(
            config.url.as_deref().unwrap_or_default(),
            config.io_timeout,
        )?),
    };

    debug!(backend = %config.backend, "Backend opened");
    Ok(backend)
}

fn required_dir(dir: &Option<PathBuf>) -> Result<PathBuf> {
    dir.clone()
        .ok_or_else(|| Error::InvalidConfig("data_dir is required".to_string()))
}

/// Hex SHA-256 of `input`, used to derive filesystem and memcached names.
pub(crate) fn digest(input: &str) -> String {
    let hash = Sha256::digest(input.as_bytes());
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// Directory name for a namespace: a readable prefix plus a hash suffix so
/// distinct namespaces never collide after sanitizing.
pub(crate) fn namespace_dir_name(namespace: &str) -> String {
    let readable: String = namespace
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(32)
        .collect();
    format!("{}-{}", readable, &digest(namespace)[..16])
}

/// Path of the per-key lock file shared by the file and dbm backends.
pub(crate) fn key_lock_path(lock_dir: &Path, namespace: &str, key: &str) -> PathBuf {
    lock_dir
        .join(namespace_dir_name(namespace))
        .join(format!("{}.lock", digest(key)))
}

pub(crate) fn io_error(backend: &'static str, path: &Path, err: std::io::Error) -> Error {
    Error::unavailable(backend, format!("{}: {}", path.display(), err))
}
