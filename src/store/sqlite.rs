//! SQLite-backed record store
//!
//! One table keyed by (collection, id) with the record as a JSON text column.
//! Inserts run in a transaction and never replace an existing row.

use super::{DuplicateRecord, RecordStore};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub struct SqliteRecordStore {
    /// Database connection
    conn: Mutex<Connection>,

    /// Database file path
    db_path: PathBuf,
}

impl SqliteRecordStore {
    /// Create or open the record database
    ///
    /// Creates the database file and schema if it doesn't exist.
    /// Uses WAL mode for better concurrency and crash resilience.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create record database directory")?;
            }
        }

        let conn = Connection::open(db_path).context("Failed to open record database")?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode")?;

        // Issued certificates must survive power loss
        conn.pragma_update(None, "synchronous", "FULL")
            .context("Failed to set synchronous mode")?;

        Self::with_connection(conn, db_path.to_path_buf())
    }

    /// Private in-memory database, mainly for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn, PathBuf::from(":memory:"))
    }

    fn with_connection(conn: Connection, db_path: PathBuf) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_records_created ON records(collection, created_at);
            "#,
        )
        .context("Failed to create record schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Record database connection poisoned"))
    }
}

impl RecordStore for SqliteRecordStore {
    fn insert(&self, collection: &str, id: &str, record: &Value) -> Result<()> {
        let payload = serde_json::to_string(record).context("Failed to serialize record")?;

        let mut conn = self.connection()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO records (collection, id, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![collection, id, payload, Utc::now().to_rfc3339()],
            )
            .context("Failed to insert record")?;

        if inserted == 0 {
            return Err(DuplicateRecord::new(collection, id).into());
        }

        tx.commit().context("Failed to commit record transaction")?;
        Ok(())
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let conn = self.connection()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load record")?;

        payload
            .map(|json| {
                serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt record {}/{}", collection, id))
            })
            .transpose()
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT id, payload FROM records WHERE collection = ?1 ORDER BY id")
            .context("Failed to prepare list query")?;

        let rows = stmt
            .query_map(params![collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("Failed to query records")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect records")?;

        rows.into_iter()
            .map(|(id, json)| {
                let value = serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt record {}/{}", collection, id))?;
                Ok((id, value))
            })
            .collect()
    }
}
