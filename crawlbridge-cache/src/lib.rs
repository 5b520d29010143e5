//! Persistent TTL key/value cache used for change detection and dedup.
//!
//! One SQLite table, one row per key:
//! `CachedAsset(Key TEXT PRIMARY KEY, Value TEXT NOT NULL, ExpiresAt INTEGER NOT NULL)`.
//!
//! Two logical keyspaces share the store: a `last-modified-<url>` namespace
//! holding timestamp strings for the cheap staleness check, and the bare
//! asset-URL namespace holding the full change hash for the authoritative
//! check. Reads never slide the expiry; expired rows are dropped lazily on
//! read and in bulk by [`DedupCache::sweep`] at the start of each run.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Upper bound on key and value lengths.
pub const MAX_ENTRY_LEN: usize = 8192;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in the dedup cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache key exceeds {MAX_ENTRY_LEN} characters ({0})")]
    KeyTooLong(usize),

    #[error("cache value exceeds {MAX_ENTRY_LEN} characters ({0})")]
    ValueTooLong(usize),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// SQLite-backed key/value store with per-entry absolute expiry.
pub struct DedupCache {
    conn: Connection,
    path: PathBuf,
}

impl DedupCache {
    /// Opens (or creates) the cache database at `path`.
    pub fn open(path: &Path) -> CacheResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS CachedAsset (
                Key TEXT NOT NULL PRIMARY KEY,
                Value TEXT NOT NULL,
                ExpiresAt INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cached_asset_expires_at
                ON CachedAsset (ExpiresAt);",
        )?;
        debug!("dedup cache opened at {}", path.display());
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Returns the on-disk location of the cache.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetches a value. Missing or expired keys yield the empty string;
    /// an expired row is deleted as a side effect.
    pub fn get(&self, key: &str) -> CacheResult<String> {
        let row: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT Value, ExpiresAt FROM CachedAsset WHERE Key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((value, expires_at)) if expires_at > now_millis() => Ok(value),
            Some(_) => {
                self.remove(key)?;
                Ok(String::new())
            }
            None => Ok(String::new()),
        }
    }

    /// Returns true if the key exists, expired or not.
    pub fn contains_key(&self, key: &str) -> CacheResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM CachedAsset WHERE Key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Inserts or updates a key with a fresh absolute expiry of
    /// now + `lifespan_millis`.
    pub fn set(&self, key: &str, value: &str, lifespan_millis: i64) -> CacheResult<()> {
        if key.len() > MAX_ENTRY_LEN {
            return Err(CacheError::KeyTooLong(key.len()));
        }
        if value.len() > MAX_ENTRY_LEN {
            return Err(CacheError::ValueTooLong(value.len()));
        }
        let expires_at = now_millis() + lifespan_millis;
        self.conn.execute(
            "INSERT INTO CachedAsset (Key, Value, ExpiresAt) VALUES (?1, ?2, ?3)
             ON CONFLICT(Key) DO UPDATE SET Value = ?2, ExpiresAt = ?3",
            params![key, value, expires_at],
        )?;
        Ok(())
    }

    /// Deletes every row whose expiry has passed; returns the count.
    pub fn sweep(&self) -> CacheResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM CachedAsset WHERE ExpiresAt <= ?1",
            params![now_millis()],
        )?;
        if removed > 0 {
            debug!("swept {removed} expired cache entries");
        }
        Ok(removed)
    }

    fn remove(&self, key: &str) -> CacheResult<()> {
        self.conn
            .execute("DELETE FROM CachedAsset WHERE Key = ?1", params![key])?;
        Ok(())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
