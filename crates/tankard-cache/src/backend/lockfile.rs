//! Advisory lock files for coordinating writers across processes.
//!
//! A lock is an exclusive OS file lock (`flock` / `LockFileEx`) on a file
//! under the lock directory. The kernel releases it when the guard is dropped
//! or the holding process exits, so a crashed writer never leaves a lock
//! behind. Lock files themselves are left in place and reused.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

const INITIAL_BACKOFF: Duration = Duration::from_millis(2);
const MAX_BACKOFF: Duration = Duration::from_millis(50);

/// A held lock file. Released on drop.
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Lock `path` exclusively, waiting up to `timeout` (forever if `None`).
    ///
    /// `label` names the locked resource in the timeout error.
    pub fn acquire(path: impl Into<PathBuf>, label: &str, timeout: Option<Duration>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| lock_error(parent, e))?;
        }

        // Each acquisition opens its own handle; OS locks on separate handles
        // conflict even within one process.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| lock_error(&path, e))?;

        let started = Instant::now();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            match file.try_lock() {
                Ok(()) => {
                    trace!(path = %path.display(), "Lock file acquired");
                    return Ok(Self { file, path });
                }
                Err(TryLockError::WouldBlock) => {}
                Err(TryLockError::Error(e)) => return Err(lock_error(&path, e)),
            }

            let waited = started.elapsed();
            if let Some(limit) = timeout
                && waited >= limit
            {
                debug!(path = %path.display(), waited = ?waited, "Lock file wait timed out");
                return Err(Error::LockTimeout {
                    key: label.to_string(),
                    waited,
                });
            }

            thread::sleep(backoff);
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        // Closing the handle releases the lock as well; unlock first so the
        // release is not tied to when the descriptor is reclaimed.
        if let Err(e) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %e, "Failed to release lock file");
        }
    }
}

fn lock_error(path: &Path, err: std::io::Error) -> Error {
    Error::unavailable("lockfile", format!("{}: {}", path.display(), err))
}
