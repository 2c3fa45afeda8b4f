//! SQLite-backed document store for records.
//!
//! Tables:
//! - `documents`: seq, id, collection, created_at_us, body (JSON)

use super::Record;
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Sort order for listings, by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListOrder {
    Asc,
    #[default]
    Desc,
}

/// Persistence for record collections.
///
/// Implementations serialize their own writes; callers never hold a
/// transaction across calls.
pub trait RecordStore: Send + Sync {
    /// Persist a new record, then trim the collection to `max_records`
    /// newest entries when a cap is given.
    fn insert(&self, record: &Record, max_records: Option<usize>) -> Result<()>;

    fn list(&self, collection: &str, order: ListOrder, limit: Option<usize>)
        -> Result<Vec<Record>>;

    fn get(&self, collection: &str, id: &str) -> Result<Option<Record>>;

    /// Replace a record's fields. Returns `None` when the id is unknown.
    fn update(
        &self,
        collection: &str,
        id: &str,
        fields: BTreeMap<String, String>,
    ) -> Result<Option<Record>>;

    /// Returns `false` when the id is unknown.
    fn delete(&self, collection: &str, id: &str) -> Result<bool>;

    fn count(&self, collection: &str) -> Result<u64>;
}

pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open (or create) the record database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create storage dir: {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open record DB: {}", db_path.display()))?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store (tests and throwaway runs).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                seq           INTEGER PRIMARY KEY AUTOINCREMENT,
                id            TEXT NOT NULL UNIQUE,
                collection    TEXT NOT NULL,
                created_at_us INTEGER NOT NULL,
                body          TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_documents_collection
                ON documents(collection, created_at_us);",
        )?;
        Ok(())
    }
}

fn decode(body: &str) -> Result<Record> {
    serde_json::from_str(body).context("Corrupt record document")
}

impl RecordStore for SqliteRecordStore {
    fn insert(&self, record: &Record, max_records: Option<usize>) -> Result<()> {
        let body = serde_json::to_string(record)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (id, collection, created_at_us, body)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.id,
                record.collection,
                record.created_at.timestamp_micros(),
                body
            ],
        )?;

        if let Some(max) = max_records {
            let evicted = conn.execute(
                "DELETE FROM documents
                 WHERE collection = ?1 AND seq NOT IN (
                     SELECT seq FROM documents WHERE collection = ?1
                     ORDER BY created_at_us DESC, seq DESC LIMIT ?2
                 )",
                params![record.collection, max as i64],
            )?;
            if evicted > 0 {
                tracing::debug!(
                    collection = %record.collection,
                    evicted,
                    "Trimmed collection to its record cap"
                );
            }
        }
        Ok(())
    }

    fn list(
        &self,
        collection: &str,
        order: ListOrder,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        let sql = match order {
            ListOrder::Desc => {
                "SELECT body FROM documents WHERE collection = ?1
                 ORDER BY created_at_us DESC, seq DESC LIMIT ?2"
            }
            ListOrder::Asc => {
                "SELECT body FROM documents WHERE collection = ?1
                 ORDER BY created_at_us ASC, seq ASC LIMIT ?2"
            }
        };
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map_or(-1, |n| n as i64);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let bodies = stmt
            .query_map(params![collection, limit], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies.iter().map(|b| decode(b)).collect()
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        body.as_deref().map(decode).transpose()
    }

    fn update(
        &self,
        collection: &str,
        id: &str,
        fields: BTreeMap<String, String>,
    ) -> Result<Option<Record>> {
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(body) = body else {
            return Ok(None);
        };

        let mut record = decode(&body)?;
        record.fields = fields;
        record.updated_at = Some(Utc::now());

        conn.execute(
            "UPDATE documents SET body = ?1 WHERE collection = ?2 AND id = ?3",
            params![serde_json::to_string(&record)?, collection, id],
        )?;
        Ok(Some(record))
    }

    fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        Ok(deleted > 0)
    }

    fn count(&self, collection: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
