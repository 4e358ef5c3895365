//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::Value;

use driftsync_core::now_millis;

use crate::error::{Result, StoreError};
use crate::migration;
use crate::object::{check_version, patched, stamp_created, Object, ObjectKey};
use crate::traits::Store;

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

fn load(conn: &Connection, key: &ObjectKey) -> Result<Option<Object>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM objects
             WHERE api_group = ?1 AND api_version = ?2 AND kind = ?3
               AND namespace = ?4 AND name = ?5",
            params![key.group, key.version, key.kind, key.namespace, key.name],
            |row| row.get(0),
        )
        .optional()?;
    body.map(|b| decode_body(&b)).transpose()
}

fn decode_body(body: &str) -> Result<Object> {
    serde_json::from_str(body).map_err(|e| StoreError::InvalidData(format!("stored object: {e}")))
}

fn next_version(tx: &Transaction<'_>) -> Result<u64> {
    tx.execute(
        "UPDATE counters SET value = value + 1 WHERE name = 'resource_version'",
        [],
    )?;
    let value: i64 = tx.query_row(
        "SELECT value FROM counters WHERE name = 'resource_version'",
        [],
        |row| row.get(0),
    )?;
    Ok(value as u64)
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, key: &ObjectKey) -> Result<Object> {
        let key = key.clone();
        self.blocking(move |conn| {
            load(conn, &key)?.ok_or_else(|| StoreError::NotFound(key.to_string()))
        })
        .await
    }

    async fn create(&self, object: &Object) -> Result<Object> {
        let mut stored = object.clone();
        self.blocking(move |conn| {
            let key = stored.key();
            let tx = conn.transaction()?;
            if load(&tx, &key)?.is_some() {
                return Err(StoreError::AlreadyExists(key.to_string()));
            }

            let version = next_version(&tx)?;
            stamp_created(&mut stored, version);
            tx.execute(
                "INSERT INTO objects (
                    api_group, api_version, kind, namespace, name,
                    uid, resource_version, body, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    key.group,
                    key.version,
                    key.kind,
                    key.namespace,
                    key.name,
                    stored.metadata.uid,
                    version as i64,
                    serde_json::to_string(&stored)?,
                    now_millis(),
                ],
            )?;
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    async fn patch(
        &self,
        key: &ObjectKey,
        merge_patch: &Value,
        expected_version: Option<&str>,
    ) -> Result<Object> {
        let key = key.clone();
        let merge_patch = merge_patch.clone();
        let expected = expected_version.map(str::to_string);
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let current =
                load(&tx, &key)?.ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            check_version(&key, &current, expected.as_deref())?;

            let Some(mut next) = patched(&current, &merge_patch)? else {
                return Ok(current);
            };
            let version = next_version(&tx)?;
            next.metadata.resource_version = version.to_string();
            tx.execute(
                "UPDATE objects SET resource_version = ?6, body = ?7, updated_at = ?8
                 WHERE api_group = ?1 AND api_version = ?2 AND kind = ?3
                   AND namespace = ?4 AND name = ?5",
                params![
                    key.group,
                    key.version,
                    key.kind,
                    key.namespace,
                    key.name,
                    version as i64,
                    serde_json::to_string(&next)?,
                    now_millis(),
                ],
            )?;
            tx.commit()?;
            Ok(next)
        })
        .await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let key = key.clone();
        self.blocking(move |conn| {
            let removed = conn.execute(
                "DELETE FROM objects
                 WHERE api_group = ?1 AND api_version = ?2 AND kind = ?3
                   AND namespace = ?4 AND name = ?5",
                params![key.group, key.version, key.kind, key.namespace, key.name],
            )?;
            if removed == 0 {
                return Err(StoreError::NotFound(key.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Object>> {
        let namespace = namespace.map(str::to_string);
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body FROM objects
                 WHERE ?1 IS NULL OR namespace = ?1
                 ORDER BY api_group, api_version, kind, namespace, name",
            )?;
            let bodies = stmt
                .query_map(params![namespace], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            bodies.iter().map(|b| decode_body(b)).collect()
        })
        .await
    }
}
