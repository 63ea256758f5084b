//! Expiration policy and staleness checks.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::container::Container;

/// How long a value stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expiration {
    /// Only explicit removal evicts the value.
    Never,
    /// The value is stale once its age reaches this duration.
    /// `After(Duration::ZERO)` makes every read stale.
    After(Duration),
}

impl Expiration {
    /// Convert an optional duration, where `None` means no expiry.
    pub fn from_option(expire: Option<Duration>) -> Self {
        match expire {
            None => Expiration::Never,
            Some(d) => Expiration::After(d),
        }
    }

    /// The duration, if any.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Expiration::Never => None,
            Expiration::After(d) => Some(*d),
        }
    }

    /// Pick the effective expiration for a read.
    ///
    /// A per-call request wins, then the expiration stored with the container,
    /// then the cache default.
    pub fn resolve(
        requested: Option<Expiration>,
        container: &Container,
        default: Option<Duration>,
    ) -> Self {
        requested
            .or_else(|| container.expire_after().map(Expiration::After))
            .unwrap_or_else(|| Expiration::from_option(default))
    }

    /// Whether a value created at `created_at` is stale at `now`.
    ///
    /// The boundary is inclusive: a value is stale exactly when its age
    /// reaches the expiration.
    pub fn is_stale(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Expiration::Never => false,
            Expiration::After(limit) => {
                let age = now.signed_duration_since(created_at);
                match chrono::Duration::from_std(*limit) {
                    Ok(limit) => age >= limit,
                    // Beyond chrono's range: effectively never.
                    Err(_) => false,
                }
            }
        }
    }
}

impl From<Duration> for Expiration {
    fn from(d: Duration) -> Self {
        Expiration::After(d)
    }
}
