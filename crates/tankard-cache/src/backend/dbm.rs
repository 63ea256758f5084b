//! Single-file-per-namespace backend.
//!
//! Each namespace is one record file, `<data_dir>/container_dbm/<namespace>.dbm`,
//! holding a JSON object of key -> container. Mutations are read-modify-write
//! under a namespace lock file and replace the record file atomically.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::trace;

use super::{Backend, LockFile, io_error, key_lock_path, namespace_dir_name};
use crate::config::BackendKind;
use crate::container::Container;
use crate::error::{Error, Result};

const NAME: &str = "dbm";

type Records = BTreeMap<String, Container>;

#[derive(Debug)]
pub struct DbmBackend {
    root: PathBuf,
    lock_dir: PathBuf,
    io_timeout: Duration,
    /// Serializes mutations from this process before the lock file is taken.
    write_guard: Mutex<()>,
}

impl DbmBackend {
    pub fn new(
        data_dir: impl AsRef<Path>,
        lock_dir: impl Into<PathBuf>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            root: data_dir.as_ref().join("container_dbm"),
            lock_dir: lock_dir.into(),
            io_timeout,
            write_guard: Mutex::new(()),
        }
    }

    fn record_path(&self, namespace: &str) -> PathBuf {
        self.root
            .join(format!("{}.dbm", namespace_dir_name(namespace)))
    }

    fn load(&self, namespace: &str) -> Result<Records> {
        let path = self.record_path(namespace);
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Records::new()),
            Err(e) => Err(io_error(NAME, &path, e)),
        }
    }

    fn store(&self, namespace: &str, records: &Records) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| io_error(NAME, &self.root, e))?;
        let path = self.record_path(namespace);
        let bytes = serde_json::to_vec(records)?;

        let mut tmp = NamedTempFile::new_in(&self.root).map_err(|e| io_error(NAME, &self.root, e))?;
        tmp.write_all(&bytes).map_err(|e| io_error(NAME, tmp.path(), e))?;
        tmp.persist(&path).map_err(|e| io_error(NAME, &path, e.error))?;
        Ok(())
    }

    /// Take the namespace lock file. Giving up after `io_timeout` is
    /// reported as the backend being unavailable.
    fn record_lock(&self, namespace: &str) -> Result<LockFile> {
        let lock_path = self
            .lock_dir
            .join(format!("{}.dbm.lock", namespace_dir_name(namespace)));
        LockFile::acquire(lock_path, namespace, Some(self.io_timeout))
            .map_err(|e| match e {
                Error::LockTimeout { waited, .. } => Error::unavailable(
                    NAME,
                    format!("namespace '{namespace}' record lock not acquired within {waited:?}"),
                ),
                other => other,
            })
    }

    /// Run `f` against the namespace records while holding the namespace lock.
    fn mutate<R>(&self, namespace: &str, f: impl FnOnce(&mut Records) -> R) -> Result<R> {
        let _local = self.write_guard.lock();
        let _lock = self.record_lock(namespace)?;

        let mut records = self.load(namespace)?;
        let out = f(&mut records);
        self.store(namespace, &records)?;
        Ok(out)
    }
}

impl Backend for DbmBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Dbm
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Container>> {
        Ok(self.load(namespace)?.remove(key))
    }

    fn set(&self, namespace: &str, container: &Container) -> Result<()> {
        self.mutate(namespace, |records| {
            records.insert(container.key().to_string(), container.clone());
        })?;
        trace!(namespace = %namespace, key = %container.key(), "Record written");
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        self.mutate(namespace, |records| records.remove(key).is_some())
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        let _local = self.write_guard.lock();
        let _lock = self.record_lock(namespace)?;
        let path = self.record_path(namespace);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(NAME, &path, e)),
        }
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        Ok(self.load(namespace)?.into_keys().collect())
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
