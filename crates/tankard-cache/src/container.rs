//! The value wrapper stored per key.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// An immutable, timestamped cached payload.
///
/// Updates never mutate a container; they build a replacement via
/// [`Container::replace`] or [`Container::touched`], which carries the
/// version forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    key: String,
    value: serde_json::Value,
    created_at: DateTime<Utc>,
    accessed_at: DateTime<Utc>,
    version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expire_after: Option<Duration>,
}

impl Container {
    /// First container written for a key.
    pub fn new(key: impl Into<String>, value: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            value,
            created_at: now,
            accessed_at: now,
            version: 1,
            expire_after: None,
        }
    }

    /// Encode `value` and wrap it.
    pub fn encode<T: Serialize>(key: impl Into<String>, value: &T, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self::new(key, serde_json::to_value(value)?, now))
    }

    /// Store an expiration alongside the value, used when a read names none.
    pub fn with_expire_after(mut self, expire: Option<Duration>) -> Self {
        self.expire_after = expire;
        self
    }

    /// Build the container that supersedes `previous` (if any) for this key.
    pub fn replace(
        previous: Option<&Container>,
        key: impl Into<String>,
        value: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        let mut next = Self::new(key, value, now);
        if let Some(prev) = previous {
            next.version = prev.version.saturating_add(1);
        }
        next
    }

    /// Same payload and creation time, new access time.
    pub fn touched(&self, now: DateTime<Utc>) -> Self {
        Self {
            accessed_at: now,
            version: self.version.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    /// Decode the payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.value)?)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn accessed_at(&self) -> DateTime<Utc> {
        self.accessed_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn expire_after(&self) -> Option<Duration> {
        self.expire_after
    }

    /// Time elapsed since the container was written.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }

    /// Encode for byte-oriented backends.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a container written by [`Container::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
