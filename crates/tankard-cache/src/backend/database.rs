//! SQLite table backend.

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::info;

use super::Backend;
use crate::config::BackendKind;
use crate::container::Container;
use crate::error::{Error, Result};

const NAME: &str = "database";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tankard_cache (
    namespace   TEXT NOT NULL,
    key         TEXT NOT NULL,
    container   TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    accessed_at TEXT NOT NULL,
    PRIMARY KEY (namespace, key)
);
";

/// Cache table in a SQLite database.
///
/// `url` is a filesystem path, `sqlite://<path>`, or `:memory:`. The
/// connection is shared behind a mutex; other processes on the same file see
/// a write as soon as it commits.
#[derive(Debug)]
pub struct DatabaseBackend {
    conn: Mutex<Connection>,
}

impl DatabaseBackend {
    pub fn open(url: &str, busy_timeout: Duration) -> Result<Self> {
        let target = url.trim();
        let target = target
            .strip_prefix("sqlite://")
            .or_else(|| target.strip_prefix("sqlite:"))
            .unwrap_or(target);

        let conn = if target == ":memory:" {
            Connection::open_in_memory()
        } else {
            let path = Path::new(target);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).map_err(|e| super::io_error(NAME, parent, e))?;
            }
            Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
        }
        .map_err(db_error)?;

        conn.busy_timeout(busy_timeout).map_err(db_error)?;
        conn.execute_batch(SCHEMA).map_err(db_error)?;

        info!(url = %target, "Database cache table ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Backend for DatabaseBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Database
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Container>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT container FROM tankard_cache WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn set(&self, namespace: &str, container: &Container) -> Result<()> {
        let json = serde_json::to_string(container)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tankard_cache (namespace, key, container, created_at, accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (namespace, key) DO UPDATE SET
                container = excluded.container,
                created_at = excluded.created_at,
                accessed_at = excluded.accessed_at",
            params![
                namespace,
                container.key(),
                json,
                container.created_at().to_rfc3339(),
                container.accessed_at().to_rfc3339(),
            ],
        )
        .map_err(db_error)?;
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn
            .execute(
                "DELETE FROM tankard_cache WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
            )
            .map_err(db_error)?;
        Ok(n > 0)
    }

    fn has(&self, namespace: &str, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM tankard_cache WHERE namespace = ?1 AND key = ?2)",
            params![namespace, key],
            |row| row.get(0),
        )
        .map_err(db_error)
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM tankard_cache WHERE namespace = ?1",
            params![namespace],
        )
        .map_err(db_error)?;
        Ok(())
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT key FROM tankard_cache WHERE namespace = ?1 ORDER BY key")
            .map_err(db_error)?;
        let keys = stmt
            .query_map(params![namespace], |row| row.get(0))
            .map_err(db_error)?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(db_error)?;
        Ok(keys)
    }
}

fn db_error(err: rusqlite::Error) -> Error {
    Error::unavailable(NAME, err)
}
