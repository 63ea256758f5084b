//! Namespaced caching with pluggable backends.
//!
//! This crate provides:
//! - Create-on-miss and create-on-stale reads that run the create function
//!   once per refresh, however many threads miss at the same time
//! - Per-namespace isolation over memory, file, dbm, memcached and SQLite
//!   backends
//! - A registry that memoizes caches by name and configuration
//! - Sessions stored as cache entries
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use tankard_cache::{CacheConfig, CacheManager, Expiration};
//!
//! let manager = CacheManager::new(CacheConfig::new().with_expire(Duration::from_secs(60)));
//! let cache = manager.get_cache("reports").unwrap();
//!
//! let total: u64 = cache.get_or_create("total", || 42).unwrap();
//! assert_eq!(total, 42);
//!
//! // Cached: the create function is not called again while fresh.
//! let total: u64 = cache
//!     .get_or_create_with("total", Expiration::Never, || unreachable!())
//!     .unwrap();
//! assert_eq!(total, 42);
//! ```

pub mod backend;
mod cache;
mod clock;
mod config;
mod container;
mod error;
mod expiry;
mod lock;
mod manager;
mod namespace;
mod session;

pub use backend::Backend;
pub use cache::{Cache, CacheStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BackendKind, CacheConfig, DEFAULT_IO_TIMEOUT, DEFAULT_MEMCACHED_PORT, RefreshPolicy,
};
pub use container::Container;
pub use error::{Error, Result};
pub use expiry::Expiration;
pub use lock::{KeyHandle, LockTable};
pub use manager::CacheManager;
pub use namespace::{NamespaceManager, WriteOutcome};
pub use session::{
    SESSION_ID_LEN, Session, SessionConfig, SessionStore, generate_session_id,
    validate_session_id,
};
