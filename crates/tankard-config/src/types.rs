//! Configuration file types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tankard_cache::{BackendKind, CacheConfig, RefreshPolicy, SessionConfig};

use crate::{ConfigError, Result};

/// Root of a `tankard.toml` file.
///
/// Every field is optional so that layers can be merged field by field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TankardConfig {
    /// Default cache settings (`[cache]`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSection>,

    /// Session store settings (`[session]`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSection>,
}

impl TankardConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: TankardConfig) {
        match (&mut self.cache, other.cache) {
            (Some(base), Some(layer)) => base.merge(layer),
            (base, layer @ Some(_)) => *base = layer,
            _ => {}
        }
        match (&mut self.session, other.session) {
            (Some(base), Some(layer)) => base.merge(layer),
            (base, layer @ Some(_)) => *base = layer,
            _ => {}
        }
    }

    /// Resolve relative paths against `base`, the directory of the file
    /// this layer was read from.
    pub fn resolve_paths(&mut self, base: &Path) {
        if let Some(cache) = &mut self.cache {
            cache.resolve_paths(base);
        }
    }

    /// Build the cache configuration, with defaults for anything unset.
    pub fn to_cache_config(&self) -> Result<CacheConfig> {
        self.cache.clone().unwrap_or_default().to_cache_config()
    }

    /// Build the session store configuration.
    pub fn to_session_config(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default().to_session_config()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache Section
// ─────────────────────────────────────────────────────────────────────────────

/// The `[cache]` section.
///
/// ```toml
/// [cache]
/// type = "file"
/// data_dir = "./cache"
/// expire = 3600
/// lock_timeout_ms = 5000
/// refresh = "serve_stale"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Backend name: memory, file, dbm, memcached, database (or an alias
    /// such as `ext:memcached`).
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// Root directory for the file and dbm backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Server list or database location for memcached and database backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Default expiration in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire: Option<u64>,

    /// Directory for cross-process lock files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_dir: Option<PathBuf>,

    /// How long writers wait for a key lock, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_timeout_ms: Option<u64>,

    /// Backend I/O timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_timeout_ms: Option<u64>,

    /// Fail reads of expired keys instead of returning the stale value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict_expiry: Option<bool>,

    /// What readers do while another caller refreshes a stale key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh: Option<RefreshPolicy>,
}

impl CacheSection {
    /// Overlay the fields set in `other`.
    pub fn merge(&mut self, other: CacheSection) {
        if other.backend.is_some() {
            self.backend = other.backend;
        }
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        if other.url.is_some() {
            self.url = other.url;
        }
        if other.expire.is_some() {
            self.expire = other.expire;
        }
        if other.lock_dir.is_some() {
            self.lock_dir = other.lock_dir;
        }
        if other.lock_timeout_ms.is_some() {
            self.lock_timeout_ms = other.lock_timeout_ms;
        }
        if other.io_timeout_ms.is_some() {
            self.io_timeout_ms = other.io_timeout_ms;
        }
        if other.strict_expiry.is_some() {
            self.strict_expiry = other.strict_expiry;
        }
        if other.refresh.is_some() {
            self.refresh = other.refresh;
        }
    }

    fn resolve_paths(&mut self, base: &Path) {
        for dir in [&mut self.data_dir, &mut self.lock_dir].into_iter().flatten() {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }

    /// The backend this section selects, defaulting to memory.
    pub fn backend_kind(&self) -> Result<BackendKind> {
        match &self.backend {
            Some(name) => name
                .parse()
                .map_err(|e: tankard_cache::Error| ConfigError::invalid("cache", e)),
            None => Ok(BackendKind::default()),
        }
    }

    /// Convert into a validated [`CacheConfig`].
    pub fn to_cache_config(&self) -> Result<CacheConfig> {
        let mut config = CacheConfig::new().with_backend(self.backend_kind()?);
        if let Some(dir) = &self.data_dir {
            config = config.with_data_dir(dir);
        }
        if let Some(url) = &self.url {
            config = config.with_url(url);
        }
        if let Some(secs) = self.expire {
            config = config.with_expire(Duration::from_secs(secs));
        }
        if let Some(dir) = &self.lock_dir {
            config = config.with_lock_dir(dir);
        }
        if let Some(ms) = self.lock_timeout_ms {
            config = config.with_lock_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.io_timeout_ms {
            config = config.with_io_timeout(Duration::from_millis(ms));
        }
        if let Some(strict) = self.strict_expiry {
            config = config.with_strict_expiry(strict);
        }
        if let Some(refresh) = self.refresh {
            config = config.with_refresh(refresh);
        }

        config
            .validate()
            .map_err(|e| ConfigError::invalid("cache", e))?;
        Ok(config)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Section
// ─────────────────────────────────────────────────────────────────────────────

/// The `[session]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Cache namespace for sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Idle timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl SessionSection {
    /// Overlay the fields set in `other`.
    pub fn merge(&mut self, other: SessionSection) {
        if other.namespace.is_some() {
            self.namespace = other.namespace;
        }
        if other.timeout.is_some() {
            self.timeout = other.timeout;
        }
    }

    pub fn to_session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new();
        if let Some(ns) = &self.namespace {
            config = config.with_namespace(ns);
        }
        if let Some(secs) = self.timeout {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        config
    }
}
