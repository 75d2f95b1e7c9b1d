// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Durable local store shared by every context of one origin.
//!
//! A single SQLite file holds JSON values under string keys. Each key carries
//! a version that increases on every write, plus the id of the context that
//! wrote it. Writers pass the version they read at; a stale version is
//! rejected with [`Error::VersionConflict`] instead of silently overwriting a
//! concurrent writer's data.
//!
//! Other contexts notice writes by probing a key's [`Stamp`].

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Error, Result};

/// SQL schema for the key-value table.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    version INTEGER NOT NULL,
    writer TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Well-known keys forming the on-disk contract between contexts.
pub mod keys {
    pub const CONSULTATIONS: &str = "consultations";
    pub const SCHEDULES: &str = "schedules";
    pub const OUTBOX: &str = "outbox";
    pub const USERS: &str = "users";
    pub const SESSION: &str = "session";
    /// Cross-context fallback signal.
    pub const SIGNAL: &str = "telemed_comm_signal_v1";
    /// Durable message log.
    pub const MESSAGES: &str = "comm:messages:v1";
}

/// How many times [`LocalStore::update`] re-reads after a conflict.
pub const MAX_UPDATE_ATTEMPTS: u32 = 16;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A value together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    /// 0 when the key does not exist.
    pub version: u64,
}

/// Version and writer of a key, used to detect foreign writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub version: u64,
    pub writer: String,
}

/// Handle to the shared store, owned by one context.
///
/// Cloning shares the underlying connection.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    conn: Mutex<Connection>,
    writer: String,
}

impl LocalStore {
    /// Opens or creates the store at the given path on behalf of `writer`.
    pub fn open(path: &Path, writer: impl Into<String>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::init(conn, writer.into())
    }

    /// Opens a private in-memory store.
    ///
    /// Only useful for a single context; other connections cannot see it.
    pub fn open_in_memory(writer: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, writer.into())
    }

    fn init(conn: Connection, writer: String) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(LocalStore {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(conn),
                writer,
            }),
        })
    }

    /// Id recorded as the writer of every change made through this handle.
    pub fn writer(&self) -> &str {
        &self.inner.writer
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.inner.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn get_raw(&self, key: &str) -> Result<Option<(String, u64)>> {
        let row = self
            .conn()
            .query_row(
                "SELECT value, version FROM kv WHERE key = ?1",
                params![key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(value, version)| (value, version as u64)))
    }

    /// Reads a key.
    ///
    /// A missing key yields `T::default()` at version 0. A value that no
    /// longer parses fails closed to `T::default()` at its stored version, so
    /// the next write replaces it.
    pub fn read<T: DeserializeOwned + Default>(&self, key: &str) -> Result<Versioned<T>> {
        let Some((raw, version)) = self.get_raw(key)? else {
            return Ok(Versioned {
                value: T::default(),
                version: 0,
            });
        };
        let value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, version, "discarding unreadable value: {}", e);
                T::default()
            }
        };
        Ok(Versioned { value, version })
    }

    /// Reads a key that may legitimately be absent.
    pub fn read_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some((raw, version)) = self.get_raw(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(key, version, "discarding unreadable value: {}", e);
                Ok(None)
            }
        }
    }

    /// Writes a key if it is still at `expected` version.
    ///
    /// Returns the new version.
    pub fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T, expected: u64) -> Result<u64> {
        let json = serde_json::to_string(value)?;
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();

        let changed = if expected == 0 {
            conn.execute(
                "INSERT INTO kv (key, value, version, writer, updated_at)
                 VALUES (?1, ?2, 1, ?3, ?4)
                 ON CONFLICT(key) DO NOTHING",
                params![key, json, self.inner.writer, now],
            )?
        } else {
            conn.execute(
                "UPDATE kv SET value = ?2, version = version + 1, writer = ?3, updated_at = ?4
                 WHERE key = ?1 AND version = ?5",
                params![key, json, self.inner.writer, now, expected as i64],
            )?
        };

        if changed == 0 {
            let actual: Option<i64> = conn
                .query_row(
                    "SELECT version FROM kv WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(Error::VersionConflict {
                key: key.to_string(),
                expected,
                actual: actual.unwrap_or(0) as u64,
            });
        }

        Ok(expected + 1)
    }

    /// Writes a key regardless of its current version.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<u64> {
        let json = serde_json::to_string(value)?;
        let now = Utc::now().to_rfc3339();
        let version: i64 = self.conn().query_row(
            "INSERT INTO kv (key, value, version, writer, updated_at)
             VALUES (?1, ?2, 1, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                version = kv.version + 1,
                writer = excluded.writer,
                updated_at = excluded.updated_at
             RETURNING version",
            params![key, json, self.inner.writer, now],
            |row| row.get(0),
        )?;
        Ok(version as u64)
    }

    /// Read-modify-write with optimistic retry.
    ///
    /// `f` runs against a fresh read on every attempt and must be safe to
    /// repeat. An error from `f` aborts without writing.
    pub fn update<T, R, F>(&self, key: &str, mut f: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnMut(&mut T) -> Result<R>,
    {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let Versioned { mut value, version } = self.read::<T>(key)?;
            let out = f(&mut value)?;
            match self.write(key, &value, version) {
                Ok(_) => return Ok(out),
                Err(Error::VersionConflict { .. }) => {
                    tracing::debug!(key, attempt, "version conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::Contention {
            key: key.to_string(),
            attempts: MAX_UPDATE_ATTEMPTS,
        })
    }

    /// Deletes a key.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Returns the current version and writer of a key.
    pub fn stamp(&self, key: &str) -> Result<Option<Stamp>> {
        let stamp = self
            .conn()
            .query_row(
                "SELECT version, writer FROM kv WHERE key = ?1",
                params![key],
                |row| {
                    Ok(Stamp {
                        version: row.get::<_, i64>(0)? as u64,
                        writer: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(stamp)
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("writer", &self.inner.writer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
