//! Memcached backend on the `memcache` client.
//!
//! Keys are hashed so arbitrary cache keys fit memcached's 250-byte, no
//! whitespace rule. Memcached cannot enumerate or delete by prefix, so each
//! namespace carries a generation counter that is embedded in every data key;
//! `clear` bumps the counter and the old entries age out on the server.

use std::fmt;
use std::time::Duration;

use memcache::{Client, CommandError, MemcacheError};
use tracing::{debug, trace};

use super::{Backend, digest};
use crate::config::{BackendKind, DEFAULT_MEMCACHED_PORT};
use crate::container::Container;
use crate::error::{Error, Result};

const NAME: &str = "memcached";

/// Connections pooled per server.
const MAX_POOL_SIZE: u32 = 8;

pub struct MemcachedBackend {
    client: Client,
    servers: Vec<String>,
}

impl fmt::Debug for MemcachedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemcachedBackend")
            .field("servers", &self.servers)
            .finish_non_exhaustive()
    }
}

impl MemcachedBackend {
    /// Parse `url` (`host[:port]` entries separated by `;` or `,`, optionally
    /// prefixed with `memcached://`). No connection is made until first use.
    pub fn new(url: &str, io_timeout: Duration) -> Result<Self> {
        let servers = parse_servers(url);
        if servers.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "memcached url '{url}' names no servers"
            )));
        }

        // r2d2 rejects a zero checkout timeout.
        let io_timeout = io_timeout.max(Duration::from_millis(1));
        let targets: Vec<String> = servers
            .iter()
            .map(|address| {
                format!(
                    "memcache://{address}?protocol=ascii&tcp_nodelay=true&timeout={}",
                    io_timeout.as_secs_f64()
                )
            })
            .collect();

        let client = Client::builder()
            .add_server(targets)
            .and_then(|builder| {
                builder
                    .with_max_pool_size(MAX_POOL_SIZE)
                    .with_min_idle_conns(0)
                    .with_connection_timeout(io_timeout)
                    .build()
            })
            .map_err(|e| match e {
                MemcacheError::BadURL(reason) => {
                    Error::InvalidConfig(format!("memcached url '{url}': {reason}"))
                }
                other => unavailable(other),
            })?;

        Ok(Self { client, servers })
    }

    /// Server addresses in configuration order.
    pub fn servers(&self) -> Vec<&str> {
        self.servers.iter().map(String::as_str).collect()
    }

    fn generation_key(namespace: &str) -> String {
        format!("tankard:gen:{}", digest(namespace))
    }

    fn data_key(namespace: &str, generation: u64, key: &str) -> String {
        format!(
            "tankard:{}:{}:{}",
            &digest(namespace)[..16],
            generation,
            digest(key)
        )
    }

    fn generation(&self, namespace: &str) -> Result<u64> {
        let raw: Option<String> = self
            .client
            .get(&Self::generation_key(namespace))
            .map_err(unavailable)?;
        Ok(raw.and_then(|s| s.trim().parse().ok()).unwrap_or(0))
    }
}

impl Backend for MemcachedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memcached
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Container>> {
        let mc_key = Self::data_key(namespace, self.generation(namespace)?, key);
        let raw: Option<Vec<u8>> = self.client.get(&mc_key).map_err(unavailable)?;
        match raw {
            Some(bytes) => Ok(Some(Container::from_bytes(&bytes)?).filter(|c| c.key() == key)),
            None => Ok(None),
        }
    }

    fn set(&self, namespace: &str, container: &Container) -> Result<()> {
        let mc_key = Self::data_key(namespace, self.generation(namespace)?, container.key());
        let bytes = container.to_bytes()?;
        self.client
            .set(&mc_key, bytes.as_slice(), 0)
            .map_err(unavailable)?;
        trace!(namespace = %namespace, key = %container.key(), "Container stored");
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let mc_key = Self::data_key(namespace, self.generation(namespace)?, key);
        self.client.delete(&mc_key).map_err(unavailable)
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        let gen_key = Self::generation_key(namespace);
        match self.client.increment(&gen_key, 1) {
            Ok(next) => {
                debug!(namespace = %namespace, generation = next, "Namespace generation bumped");
                Ok(())
            }
            // No counter yet. If another client adds it first, its clear
            // already moved the namespace off generation 0.
            Err(MemcacheError::CommandError(CommandError::KeyNotFound)) => {
                self.client.add(&gen_key, "1", 0).map_err(unavailable)?;
                debug!(namespace = %namespace, generation = 1, "Namespace generation started");
                Ok(())
            }
            Err(e) => Err(unavailable(e)),
        }
    }
}

fn parse_servers(url: &str) -> Vec<String> {
    url.split([';', ','])
        .map(|s| s.trim().trim_start_matches("memcached://").trim_end_matches('/'))
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.contains(':') {
                s.to_string()
            } else {
                format!("{s}:{DEFAULT_MEMCACHED_PORT}")
            }
        })
        .collect()
}

fn unavailable(err: MemcacheError) -> Error {
    Error::unavailable(NAME, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_parsing() {
        let b = MemcachedBackend::new(
            "memcached://10.0.0.1:11311; cache-b ,",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(b.servers(), vec!["10.0.0.1:11311", "cache-b:11211"]);

        assert!(matches!(
            MemcachedBackend::new(" ; ", Duration::from_secs(1)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_malformed_server_is_invalid_config() {
        assert!(matches!(
            MemcachedBackend::new("host:port:extra", Duration::from_secs(1)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_data_keys_are_protocol_safe() {
        let key = MemcachedBackend::data_key("name space", 3, &"x y\r\n".repeat(200));
        assert!(key.len() <= 250);
        assert!(!key.chars().any(|c| c.is_whitespace() || c.is_control()));
    }

    #[test]
    fn test_generation_changes_data_key() {
        assert_ne!(
            MemcachedBackend::data_key("ns", 0, "k"),
            MemcachedBackend::data_key("ns", 1, "k")
        );
    }

    #[test]
    fn test_unreachable_server_is_unavailable() {
        // Bind then drop to get a port nothing listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let b = MemcachedBackend::new(&format!("127.0.0.1:{port}"), Duration::from_millis(200))
            .unwrap();

        let err = b.get("ns", "k").unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable { backend: "memcached", .. }));
    }
}
