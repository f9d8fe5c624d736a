//! Storage sessions for indexed file records
//!
//! A spider writes everything it finds on one server inside a single
//! transaction: `begin`, one `upsert_record` per file, then `commit` (or
//! `rollback` if the scan failed half way).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               SpiderRunner                  │
//! └─────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────┐
//! │          StorageSession (trait)             │
//! └─────────────────────────────────────────────┘
//!            │                        │
//!            ▼                        ▼
//! ┌─────────────────────┐  ┌─────────────────────┐
//! │   SqliteSession     │  │   MemorySession     │
//! └─────────────────────┘  └─────────────────────┘
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

// ============================================================================
// Core Types
// ============================================================================

/// A file found on a server share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Server the file lives on
    pub server: String,

    /// Path relative to the share root, `/`-separated
    pub path: String,

    /// File name (last path component)
    pub name: String,

    /// Size in bytes
    pub size: u64,

    /// MIME type sniffed from the file header
    pub mime_type: Option<String>,

    /// Modification time reported by the share
    pub modified: Option<DateTime<Utc>>,

    /// When the spider last saw the file
    pub last_seen: DateTime<Utc>,
}

impl FileRecord {
    /// Create a record seen now
    pub fn new(server: impl Into<String>, path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();

        Self {
            server: server.into(),
            path,
            name,
            size,
            mime_type: None,
            modified: None,
            last_seen: Utc::now(),
        }
    }

    /// Set modification time
    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Set MIME type
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Set last-seen time
    pub fn with_last_seen(mut self, last_seen: DateTime<Utc>) -> Self {
        self.last_seen = last_seen;
        self
    }
}

// ============================================================================
// Session Trait
// ============================================================================

/// Transactional store for file records
///
/// Sessions are passed explicitly to whoever needs them; there is no
/// process-wide connection.
pub trait StorageSession: Send + Sync {
    /// Start a transaction
    fn begin(&self) -> Result<()>;

    /// Commit the open transaction
    fn commit(&self) -> Result<()>;

    /// Discard the open transaction
    fn rollback(&self) -> Result<()>;

    /// Insert or update a record keyed by `(server, path)`
    fn upsert_record(&self, record: &FileRecord) -> Result<()>;

    /// Look up a record
    fn get_record(&self, server: &str, path: &str) -> Result<Option<FileRecord>>;

    /// Number of records for a server
    fn count_records(&self, server: &str) -> Result<usize>;

    /// Delete records of `server` not seen since `before`; returns how many were removed
    fn remove_stale(&self, server: &str, before: DateTime<Utc>) -> Result<usize>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of StorageSession
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteSession {
    conn: Mutex<Connection>,
}

impl SqliteSession {
    /// Open (or create) a database file
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let session = Self {
            conn: Mutex::new(conn),
        };
        session.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite storage initialized");
        Ok(session)
    }

    /// Create in-memory session (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        let session = Self {
            conn: Mutex::new(conn),
        };
        session.create_schema()?;
        Ok(session)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS mss_files (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    server_name TEXT NOT NULL,
                    file_path TEXT NOT NULL,
                    name TEXT NOT NULL,
                    size INTEGER NOT NULL,
                    mime_type TEXT,
                    modified TEXT,
                    last_seen TEXT NOT NULL,
                    UNIQUE(server_name, file_path)
                );

                CREATE INDEX IF NOT EXISTS idx_mss_files_server
                    ON mss_files(server_name);

                CREATE INDEX IF NOT EXISTS idx_mss_files_name
                    ON mss_files(name);
                "#,
        )
        .context("Failed to create SQLite schema")?;

        Ok(())
    }
}

/// Fixed-width UTC timestamps so that text comparison orders them correctly
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp in storage: {value}"))?
        .with_timezone(&Utc))
}

impl StorageSession for SqliteSession {
    fn begin(&self) -> Result<()> {
        self.conn()?
            .execute_batch("BEGIN IMMEDIATE")
            .context("Failed to begin transaction")
    }

    fn commit(&self) -> Result<()> {
        self.conn()?
            .execute_batch("COMMIT")
            .context("Failed to commit transaction")
    }

    fn rollback(&self) -> Result<()> {
        self.conn()?
            .execute_batch("ROLLBACK")
            .context("Failed to roll back transaction")
    }

    fn upsert_record(&self, record: &FileRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO mss_files (server_name, file_path, name, size, mime_type, modified, last_seen)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(server_name, file_path) DO UPDATE SET
                name = excluded.name,
                size = excluded.size,
                mime_type = excluded.mime_type,
                modified = excluded.modified,
                last_seen = excluded.last_seen
            "#,
            params![
                record.server,
                record.path,
                record.name,
                record.size as i64,
                record.mime_type,
                record.modified.as_ref().map(format_timestamp),
                format_timestamp(&record.last_seen),
            ],
        )
        .with_context(|| format!("Failed to upsert {}:{}", record.server, record.path))?;

        Ok(())
    }

    fn get_record(&self, server: &str, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT server_name, file_path, name, size, mime_type, modified, last_seen
                FROM mss_files WHERE server_name = ?1 AND file_path = ?2
                "#,
                params![server, path],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query file record")?;

        let Some((server, path, name, size, mime_type, modified, last_seen)) = row else {
            return Ok(None);
        };

        Ok(Some(FileRecord {
            server,
            path,
            name,
            size: size.max(0) as u64,
            mime_type,
            modified: modified.as_deref().map(parse_timestamp).transpose()?,
            last_seen: parse_timestamp(&last_seen)?,
        }))
    }

    fn count_records(&self, server: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM mss_files WHERE server_name = ?1",
                params![server],
                |row| row.get(0),
            )
            .context("Failed to count file records")?;

        Ok(count as usize)
    }

    fn remove_stale(&self, server: &str, before: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM mss_files WHERE server_name = ?1 AND last_seen < ?2",
                params![server, format_timestamp(&before)],
            )
            .context("Failed to remove stale records")?;

        Ok(removed)
    }
}

// ============================================================================
// In-memory Implementation (for testing)
// ============================================================================

type RecordKey = (String, String);

/// In-memory implementation of StorageSession
///
/// Useful for testing without database dependencies.
#[derive(Default)]
pub struct MemorySession {
    records: RwLock<HashMap<RecordKey, FileRecord>>,

    /// Snapshot taken at `begin`, restored on `rollback`
    snapshot: Mutex<Option<HashMap<RecordKey, FileRecord>>>,
}

impl MemorySession {
    /// Create a new empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all servers
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check whether a transaction is open
    pub fn in_transaction(&self) -> bool {
        self.snapshot.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    fn records(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<RecordKey, FileRecord>>> {
        self.records.read().map_err(|_| anyhow!("record lock poisoned"))
    }

    fn records_mut(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<RecordKey, FileRecord>>> {
        self.records.write().map_err(|_| anyhow!("record lock poisoned"))
    }

    fn snapshot(&self) -> Result<MutexGuard<'_, Option<HashMap<RecordKey, FileRecord>>>> {
        self.snapshot.lock().map_err(|_| anyhow!("snapshot lock poisoned"))
    }
}

impl StorageSession for MemorySession {
    fn begin(&self) -> Result<()> {
        let mut snapshot = self.snapshot()?;
        if snapshot.is_some() {
            bail!("Transaction already open");
        }
        *snapshot = Some(self.records()?.clone());
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        if self.snapshot()?.take().is_none() {
            bail!("No transaction to commit");
        }
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let Some(saved) = self.snapshot()?.take() else {
            bail!("No transaction to roll back");
        };
        *self.records_mut()? = saved;
        Ok(())
    }

    fn upsert_record(&self, record: &FileRecord) -> Result<()> {
        self.records_mut()?.insert(
            (record.server.clone(), record.path.clone()),
            record.clone(),
        );
        Ok(())
    }

    fn get_record(&self, server: &str, path: &str) -> Result<Option<FileRecord>> {
        Ok(self
            .records()?
            .get(&(server.to_string(), path.to_string()))
            .cloned())
    }

    fn count_records(&self, server: &str) -> Result<usize> {
        Ok(self
            .records()?
            .keys()
            .filter(|(s, _)| s == server)
            .count())
    }

    fn remove_stale(&self, server: &str, before: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records_mut()?;
        let initial = records.len();
        records.retain(|(s, _), record| s != server || record.last_seen >= before);
        Ok(initial - records.len())
    }
}

// ============================================================================
// Tests
// ============================================================================
