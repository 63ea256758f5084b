//! Configuration for caches and their backends.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default timeout for backend I/O (socket reads, SQLite busy wait).
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Default memcached port when the URL omits one.
pub const DEFAULT_MEMCACHED_PORT: u16 = 11211;

/// Storage medium backing a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Process-local hash map.
    #[default]
    Memory,
    /// One file per key under `data_dir`.
    File,
    /// One record file per namespace under `data_dir`.
    Dbm,
    /// Remote memcached server(s) reached through `url`.
    Memcached,
    /// SQLite table reached through `url`.
    Database,
}

impl BackendKind {
    /// Name used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::Dbm => "dbm",
            BackendKind::Memcached => "memcached",
            BackendKind::Database => "database",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "file" => Ok(BackendKind::File),
            "dbm" => Ok(BackendKind::Dbm),
            "memcached" | "ext:memcached" => Ok(BackendKind::Memcached),
            "database" | "ext:database" | "sqlite" => Ok(BackendKind::Database),
            other => Err(Error::InvalidConfig(format!(
                "unknown backend type '{other}'"
            ))),
        }
    }
}

/// What a reader does when it finds a stale value that another caller is
/// already recomputing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Block until the recomputation finishes, then return the fresh value.
    #[default]
    Wait,
    /// Return the stale value immediately.
    ServeStale,
}

/// Configuration for one cache: backend selection plus expiration policy.
///
/// Two caches with the same namespace and an equal (normalized) configuration
/// are the same cache; see [`crate::CacheManager`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheConfig {
    /// Storage medium.
    pub backend: BackendKind,

    /// Filesystem root for the file and dbm backends.
    pub data_dir: Option<PathBuf>,

    /// Connection string for the memcached and database backends.
    pub url: Option<String>,

    /// Default expiration applied when a read does not specify one.
    pub expire: Option<Duration>,

    /// Directory for cross-process lock files (file and dbm backends).
    /// Defaults to `<data_dir>/lock`.
    pub lock_dir: Option<PathBuf>,

    /// How long a writer waits for the per-key lock. `None` waits forever.
    pub lock_timeout: Option<Duration>,

    /// Timeout for backend I/O.
    pub io_timeout: Duration,

    /// Return [`Error::KeyExpired`] instead of the stale value when a key has
    /// expired and no create function was given.
    pub strict_expiry: bool,

    /// Behaviour of readers that hit a key being recomputed.
    pub refresh: RefreshPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            data_dir: None,
            url: None,
            expire: None,
            lock_dir: None,
            lock_timeout: None,
            io_timeout: DEFAULT_IO_TIMEOUT,
            strict_expiry: false,
            refresh: RefreshPolicy::Wait,
        }
    }
}

impl CacheConfig {
    /// Create a new configuration with default values (memory backend).
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the backend.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the data directory for file-based backends.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Set the connection URL for memcached or database backends.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the default expiration.
    pub fn with_expire(mut self, expire: Duration) -> Self {
        self.expire = Some(expire);
        self
    }

    /// Values never expire by time unless a read asks for it.
    pub fn without_expire(mut self) -> Self {
        self.expire = None;
        self
    }

    /// Set the lock file directory.
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    /// Bound how long writers wait for a per-key lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Set the backend I/O timeout.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Enable or disable strict expiry.
    pub fn with_strict_expiry(mut self, strict: bool) -> Self {
        self.strict_expiry = strict;
        self
    }

    /// Set the refresh policy.
    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    /// Check that the options required by the backend are present.
    pub fn validate(&self) -> Result<()> {
        match self.backend {
            BackendKind::File | BackendKind::Dbm if self.data_dir.is_none() => Err(
                Error::InvalidConfig(format!("{} backend requires data_dir", self.backend)),
            ),
            BackendKind::Memcached | BackendKind::Database
                if self.url.as_deref().is_none_or(|u| u.trim().is_empty()) =>
            {
                Err(Error::InvalidConfig(format!(
                    "{} backend requires url",
                    self.backend
                )))
            }
            _ => Ok(()),
        }
    }

    /// Canonical form used as a registry key.
    ///
    /// Options the backend ignores are cleared, the URL is trimmed and the
    /// lock directory is resolved, so equivalent configurations compare equal.
    pub fn normalized(&self) -> Self {
        let mut cfg = self.clone();
        cfg.url = cfg
            .url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        match cfg.backend {
            BackendKind::Memory => {
                cfg.data_dir = None;
                cfg.url = None;
                cfg.lock_dir = None;
                cfg.io_timeout = DEFAULT_IO_TIMEOUT;
            }
            BackendKind::File | BackendKind::Dbm => {
                cfg.url = None;
                if cfg.lock_dir.is_none() {
                    cfg.lock_dir = cfg.data_dir.as_ref().map(|d| d.join("lock"));
                }
                if cfg.backend == BackendKind::File {
                    cfg.io_timeout = DEFAULT_IO_TIMEOUT;
                }
            }
            BackendKind::Memcached | BackendKind::Database => {
                cfg.data_dir = None;
                cfg.lock_dir = None;
            }
        }
        cfg
    }

    /// The subset of the configuration that identifies physical storage.
    pub(crate) fn storage_key(&self) -> StorageKey {
        let cfg = self.normalized();
        StorageKey {
            backend: cfg.backend,
            data_dir: cfg.data_dir,
            url: cfg.url,
            lock_dir: cfg.lock_dir,
        }
    }
}

/// Identity of a physical storage location, shared by every cache using it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct StorageKey {
    pub backend: BackendKind,
    pub data_dir: Option<PathBuf>,
    pub url: Option<String>,
    pub lock_dir: Option<PathBuf>,
}
