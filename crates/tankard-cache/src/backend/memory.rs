//! Process-local backend.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::Backend;
use crate::config::BackendKind;
use crate::container::Container;
use crate::error::Result;

/// In-memory store: namespace -> key -> container.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    namespaces: RwLock<HashMap<String, HashMap<String, Container>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Container>> {
        let namespaces = self.namespaces.read();
        Ok(namespaces.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    fn set(&self, namespace: &str, container: &Container) -> Result<()> {
        self.namespaces
            .write()
            .entry(namespace.to_string())
            .or_default()
            .insert(container.key().to_string(), container.clone());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let mut namespaces = self.namespaces.write();
        Ok(namespaces
            .get_mut(namespace)
            .is_some_and(|ns| ns.remove(key).is_some()))
    }

    fn has(&self, namespace: &str, key: &str) -> Result<bool> {
        let namespaces = self.namespaces.read();
        Ok(namespaces.get(namespace).is_some_and(|ns| ns.contains_key(key)))
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        self.namespaces.write().remove(namespace);
        Ok(())
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let namespaces = self.namespaces.read();
        Ok(namespaces
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_set_get_delete() {
        let backend = MemoryBackend::new();
        let c = Container::new("a", serde_json::json!(1), Utc::now());

        backend.set("ns", &c).unwrap();
        assert_eq!(backend.get("ns", "a").unwrap(), Some(c));
        assert!(backend.has("ns", "a").unwrap());

        assert!(backend.delete("ns", "a").unwrap());
        assert!(!backend.delete("ns", "a").unwrap());
        assert_eq!(backend.get("ns", "a").unwrap(), None);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let backend = MemoryBackend::new();
        backend
            .set("one", &Container::new("k", serde_json::json!(1), Utc::now()))
            .unwrap();

        assert!(!backend.has("two", "k").unwrap());
        backend.clear("two").unwrap();
        assert!(backend.has("one", "k").unwrap());
    }

    #[test]
    fn test_clear_twice() {
        let backend = MemoryBackend::new();
        backend
            .set("ns", &Container::new("k", serde_json::json!(1), Utc::now()))
            .unwrap();

        backend.clear("ns").unwrap();
        assert!(backend.keys("ns").unwrap().is_empty());
        backend.clear("ns").unwrap();
        assert!(backend.keys("ns").unwrap().is_empty());
    }
}
