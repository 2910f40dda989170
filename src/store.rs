//! Persistent set of already-delivered URL fingerprints.

use crate::model::fingerprint;
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sent (
    fingerprint TEXT PRIMARY KEY,
    sent_at     TEXT NOT NULL
);
"#;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite: {0}")] Sqlite(#[from] rusqlite::Error),
    #[error("IO: {0}")] Io(#[from] std::io::Error),
}

/// Owns the one connection of a run; dropping it closes the database.
pub struct SentStore {
    conn: Connection,
}

impl SentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    /// Same contract, nothing survives the process (`USE_DB=0`)
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn was_sent(&self, url: &str) -> Result<bool, StoreError> {
        let hit: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sent WHERE fingerprint = ?1",
                params![fingerprint(url)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    /// Idempotent: an existing fingerprint keeps its original timestamp.
    pub fn mark_sent(&self, url: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO sent (fingerprint, sent_at) VALUES (?1, ?2)",
            params![fingerprint(url), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Marks a whole delivered digest in one transaction.
    pub fn mark_all_sent<'a>(&mut self, urls: impl IntoIterator<Item = &'a str>) -> Result<usize, StoreError> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO sent (fingerprint, sent_at) VALUES (?1, ?2)")?;
            for url in urls {
                inserted += stmt.execute(params![fingerprint(url), now])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Retention extension: drops records older than `days`. Off unless configured.
    pub fn prune_older_than(&self, days: i64) -> Result<usize, StoreError> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        Ok(self.conn.execute("DELETE FROM sent WHERE sent_at < ?1", params![cutoff])?)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM sent", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
