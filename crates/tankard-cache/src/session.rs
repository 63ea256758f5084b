//! Sessions stored as cache entries.
//!
//! A session is a string-keyed map of JSON values held in one cache entry,
//! keyed by a random identifier. Transporting the identifier (cookies,
//! signing) is left to the caller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::Cache;
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::expiry::Expiration;
use crate::manager::CacheManager;

/// Random bytes per session id.
const SESSION_ID_BYTES: usize = 32;

/// Length of an encoded session id.
pub const SESSION_ID_LEN: usize = 43;

/// Generate a new session id: 32 random bytes, URL-safe base64 without padding.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Check that `id` has the shape of a generated session id.
pub fn validate_session_id(id: &str) -> Result<()> {
    if id.len() != SESSION_ID_LEN {
        return Err(Error::InvalidSessionId(format!(
            "expected {} characters, got {}",
            SESSION_ID_LEN,
            id.len()
        )));
    }
    match URL_SAFE_NO_PAD.decode(id) {
        Ok(bytes) if bytes.len() == SESSION_ID_BYTES => Ok(()),
        Ok(bytes) => Err(Error::InvalidSessionId(format!(
            "decoded to {} bytes",
            bytes.len()
        ))),
        Err(e) => Err(Error::InvalidSessionId(e.to_string())),
    }
}

/// Session store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Cache namespace holding the sessions.
    pub namespace: String,

    /// Idle time after which a session is discarded. `None` keeps sessions
    /// until they are deleted.
    pub timeout: Option<Duration>,

    /// Cache configuration; the manager defaults when `None`.
    pub cache: Option<CacheConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            namespace: "session".to_string(),
            timeout: None,
            cache: None,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    data: BTreeMap<String, serde_json::Value>,
    created_at: DateTime<Utc>,
}

/// Creates and loads sessions from one cache namespace.
#[derive(Debug, Clone)]
pub struct SessionStore {
    cache: Arc<Cache>,
    timeout: Option<Duration>,
}

impl SessionStore {
    /// Open the session namespace through `manager`.
    pub fn new(manager: &CacheManager, config: SessionConfig) -> Result<Self> {
        let cache = match &config.cache {
            Some(cache_config) => manager.get_cache_with(&config.namespace, cache_config)?,
            None => manager.get_cache(&config.namespace)?,
        };
        Ok(Self {
            cache,
            timeout: config.timeout,
        })
    }

    /// The cache backing this store.
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Start a new, unsaved session.
    pub fn create(&self) -> Session {
        let now = self.cache.clock().now();
        let session = Session {
            store: self.clone(),
            id: generate_session_id(),
            data: BTreeMap::new(),
            created_at: now,
            accessed_at: now,
            is_new: true,
        };
        debug!(namespace = %self.cache.namespace(), "Session created");
        session
    }

    /// Load the session `id`.
    ///
    /// An unknown, malformed, or timed-out id yields a new session with a
    /// fresh id instead of an error. A timed-out session is removed.
    pub fn load(&self, id: &str) -> Result<Session> {
        if let Err(e) = validate_session_id(id) {
            debug!(error = %e, "Rejected session id, starting new session");
            return Ok(self.create());
        }

        let Some(container) = self.cache.get_container(id)? else {
            debug!(namespace = %self.cache.namespace(), "Session not found, starting new session");
            return Ok(self.create());
        };

        if let Some(timeout) = self.timeout {
            let now = self.cache.clock().now();
            if Expiration::After(timeout).is_stale(container.accessed_at(), now) {
                self.cache.remove_value(id)?;
                info!(namespace = %self.cache.namespace(), "Session timed out");
                return Ok(self.create());
            }
        }

        let record: SessionRecord = container.decode()?;
        Ok(Session {
            store: self.clone(),
            id: id.to_string(),
            data: record.data,
            created_at: record.created_at,
            accessed_at: container.accessed_at(),
            is_new: false,
        })
    }

    /// Whether a session is stored under `id`, regardless of timeout.
    pub fn exists(&self, id: &str) -> Result<bool> {
        if validate_session_id(id).is_err() {
            return Ok(false);
        }
        self.cache.has_key(id)
    }
}

/// A loaded or newly created session.
///
/// Changes stay local until [`Session::save`] is called.
#[derive(Debug, Clone)]
pub struct Session {
    store: SessionStore,
    id: String,
    data: BTreeMap<String, serde_json::Value>,
    created_at: DateTime<Utc>,
    accessed_at: DateTime<Utc>,
    is_new: bool,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this session has not been saved yet under its current id.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn accessed_at(&self) -> DateTime<Utc> {
        self.accessed_at
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Decode the value under `key`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.data
            .get(key)
            .map(|v| T::deserialize(v).map_err(Error::from))
            .transpose()
    }

    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<()> {
        self.data.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.data.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Persist the session and refresh its access time.
    pub fn save(&mut self) -> Result<()> {
        let record = SessionRecord {
            data: self.data.clone(),
            created_at: self.created_at,
        };
        self.store.cache.set_value(&self.id, &record)?;
        self.accessed_at = self.store.cache.clock().now();
        self.is_new = false;
        Ok(())
    }

    /// Refresh the stored access time without rewriting the data.
    /// Returns `false` if the session is not stored.
    pub fn touch(&mut self) -> Result<bool> {
        let touched = self.store.cache.touch(&self.id)?;
        if touched {
            self.accessed_at = self.store.cache.clock().now();
        }
        Ok(touched)
    }

    /// Drop the stored session and continue under a new, empty one.
    pub fn invalidate(&mut self) -> Result<()> {
        self.store.cache.remove_value(&self.id)?;
        let now = self.store.cache.clock().now();
        self.id = generate_session_id();
        self.data.clear();
        self.created_at = now;
        self.accessed_at = now;
        self.is_new = true;
        info!(namespace = %self.store.cache.namespace(), "Session invalidated");
        Ok(())
    }

    /// Remove the stored session. Returns whether it existed.
    pub fn delete(self) -> Result<bool> {
        self.store.cache.remove_value(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store(timeout: Option<Duration>) -> (SessionStore, ManualClock) {
        let clock = ManualClock::default();
        let manager = CacheManager::new(CacheConfig::new()).with_clock(Arc::new(clock.clone()));
        let mut config = SessionConfig::new();
        config.timeout = timeout;
        (SessionStore::new(&manager, config).unwrap(), clock)
    }

    #[test]
    fn test_generated_ids_are_valid_and_distinct() {
        let a = generate_session_id();
        let b = generate_session_id();

        assert_eq!(a.len(), SESSION_ID_LEN);
        assert!(validate_session_id(&a).is_ok());
        assert_ne!(a, b);
    }

    #[test]
    fn test_validate_rejects_malformed_ids() {
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("short").is_err());
        assert!(validate_session_id(&"!".repeat(SESSION_ID_LEN)).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let (store, _) = store(None);
        let mut session = store.create();
        assert!(session.is_new());
        session.set("user", &"alice").unwrap();
        session.set("visits", &3).unwrap();
        session.save().unwrap();

        let loaded = store.load(session.id()).unwrap();
        assert!(!loaded.is_new());
        assert_eq!(loaded.id(), session.id());
        assert_eq!(loaded.get_as::<String>("user").unwrap().as_deref(), Some("alice"));
        assert_eq!(loaded.get_as::<i32>("visits").unwrap(), Some(3));
        assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["user", "visits"]);
    }

    #[test]
    fn test_unsaved_changes_are_not_visible() {
        let (store, _) = store(None);
        let mut session = store.create();
        session.save().unwrap();
        session.set("k", &1).unwrap();

        assert!(store.load(session.id()).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_and_malformed_ids_start_fresh() {
        let (store, _) = store(None);

        let unknown = generate_session_id();
        let fresh = store.load(&unknown).unwrap();
        assert!(fresh.is_new());
        assert_ne!(fresh.id(), unknown);

        let fresh = store.load("not a session id").unwrap();
        assert!(fresh.is_new());
        assert!(!store.exists("not a session id").unwrap());
    }

    #[test]
    fn test_timeout_is_measured_from_last_access() {
        let (store, clock) = store(Some(Duration::from_secs(60)));
        let mut session = store.create();
        session.save().unwrap();
        let id = session.id().to_string();

        clock.advance(Duration::from_secs(59));
        assert!(session.touch().unwrap());
        clock.advance(Duration::from_secs(59));
        assert!(!store.load(&id).unwrap().is_new());

        clock.advance(Duration::from_secs(60));
        let expired = store.load(&id).unwrap();
        assert!(expired.is_new());
        assert!(!store.exists(&id).unwrap());
    }

    #[test]
    fn test_invalidate_rotates_id() {
        let (store, _) = store(None);
        let mut session = store.create();
        session.set("k", &1).unwrap();
        session.save().unwrap();
        let old_id = session.id().to_string();

        session.invalidate().unwrap();
        assert_ne!(session.id(), old_id);
        assert!(session.is_empty());
        assert!(!store.exists(&old_id).unwrap());
    }

    #[test]
    fn test_delete() {
        let (store, _) = store(None);
        let mut session = store.create();
        session.save().unwrap();
        let id = session.id().to_string();

        assert!(session.delete().unwrap());
        assert!(!store.exists(&id).unwrap());
    }
}
