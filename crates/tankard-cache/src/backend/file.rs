//! One-file-per-key backend.
//!
//! Layout: `<data_dir>/container_file/<namespace>/<sha256(key)>.json`. Writes go
//! to a temporary file in the same directory and are renamed into place, so a
//! reader in any process sees either the old or the new container.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::trace;

use super::{Backend, LockFile, digest, io_error, key_lock_path, namespace_dir_name};
use crate::config::BackendKind;
use crate::container::Container;
use crate::error::Result;

const NAME: &str = "file";

#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    lock_dir: PathBuf,
}

impl FileBackend {
    pub fn new(data_dir: impl AsRef<Path>, lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: data_dir.as_ref().join("container_file"),
            lock_dir: lock_dir.into(),
        }
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace_dir_name(namespace))
    }

    fn key_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{}.json", digest(key)))
    }

    fn read(path: &Path) -> Result<Option<Container>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(Container::from_bytes(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(NAME, path, e)),
        }
    }
}

impl Backend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Container>> {
        let path = self.key_path(namespace, key);
        Ok(Self::read(&path)?.filter(|c| c.key() == key))
    }

    fn set(&self, namespace: &str, container: &Container) -> Result<()> {
        let dir = self.namespace_dir(namespace);
        fs::create_dir_all(&dir).map_err(|e| io_error(NAME, &dir, e))?;

        let path = self.key_path(namespace, container.key());
        let bytes = container.to_bytes()?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| io_error(NAME, &dir, e))?;
        tmp.write_all(&bytes).map_err(|e| io_error(NAME, tmp.path(), e))?;
        tmp.persist(&path).map_err(|e| io_error(NAME, &path, e.error))?;

        trace!(namespace = %namespace, key = %container.key(), path = %path.display(), "Container written");
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let path = self.key_path(namespace, key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(NAME, &path, e)),
        }
    }

    fn has(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self.key_path(namespace, key).is_file())
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        let dir = self.namespace_dir(namespace);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(NAME, &dir, e)),
        }
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let dir = self.namespace_dir(namespace);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(NAME, &dir, e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| io_error(NAME, &dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(container) = Self::read(&path)?
            {
                keys.push(container.key().to_string());
            }
        }
        Ok(keys)
    }

    fn lock_key(
        &self,
        namespace: &str,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<LockFile>> {
        let path = key_lock_path(&self.lock_dir, namespace, key);
        LockFile::acquire(path, key, timeout).map(Some)
    }
}
