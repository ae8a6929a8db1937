use crate::report::BatchStats;
use chrono::{DateTime, Utc};
use homefront_scanner::cache::{CacheEntry, CacheStore};
use homefront_scanner::ScanError;
use rusqlite::{Connection, OptionalExtension, Result, params};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// SQLite-backed cache and run history.
///
/// An alternative to the one-file-per-entry disk cache when many workers or
/// processes share one cache.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

impl SqliteStore {
    pub fn new(path: &Path) -> crate::error::Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;

        // Concurrent readers, one writer
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        let store = SqliteStore {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cache_entries (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                stored_at TEXT NOT NULL,   -- RFC 3339
                value TEXT NOT NULL,       -- JSON
                PRIMARY KEY(namespace, key)
            );

            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed')),
                command_line TEXT NOT NULL,
                targets INTEGER NOT NULL,
                success INTEGER,
                failed INTEGER,
                test_errors INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
            ",
        )
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| rusqlite::Error::InvalidParameterName(format!("connection lock poisoned: {}", e)))
    }

    pub fn create_run(&self, run_id: &str, command_line: &str, targets: usize) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO runs (id, start_time, status, command_line, targets) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, current_timestamp(), "running", command_line, targets as i64],
        )?;
        Ok(())
    }

    pub fn complete_run(&self, run_id: &str, stats: &BatchStats) -> Result<()> {
        self.finish_run(run_id, "completed", stats)
    }

    /// Close a run that could not be fully recorded, keeping the counts reached.
    pub fn fail_run(&self, run_id: &str, stats: &BatchStats) -> Result<()> {
        self.finish_run(run_id, "failed", stats)
    }

    fn finish_run(&self, run_id: &str, status: &str, stats: &BatchStats) -> Result<()> {
        self.conn()?.execute(
            "UPDATE runs SET status = ?1, end_time = ?2, success = ?3, failed = ?4, test_errors = ?5 WHERE id = ?6",
            params![
                status,
                current_timestamp(),
                stats.success as i64,
                stats.failed as i64,
                stats.test_errors as i64,
                run_id
            ],
        )?;
        Ok(())
    }

    pub fn run_status(&self, run_id: &str) -> Result<Option<String>> {
        self.conn()?
            .query_row("SELECT status FROM runs WHERE id = ?1", params![run_id], |row| row.get(0))
            .optional()
    }

    /// Delete entries in `namespace` older than `ttl`. Returns how many went.
    pub fn purge_expired(&self, namespace: &str, ttl: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, stored_at FROM cache_entries WHERE namespace = ?1")?;
        let expired: Vec<String> = stmt
            .query_map(params![namespace], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .filter_map(|row| row.ok())
            .filter(|(_, stored_at)| {
                DateTime::parse_from_rfc3339(stored_at)
                    .map(|t| t.with_timezone(&Utc) < cutoff)
                    .unwrap_or(true)
            })
            .map(|(key, _)| key)
            .collect();
        drop(stmt);

        for key in &expired {
            conn.execute(
                "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
            )?;
        }
        Ok(expired.len())
    }
}

fn cache_error(e: rusqlite::Error) -> ScanError {
    ScanError::CacheError(e.to_string())
}

impl CacheStore for SqliteStore {
    fn load(&self, namespace: &str, key: &str) -> homefront_scanner::error::Result<Option<CacheEntry>> {
        let row: Option<(String, String)> = self
            .conn()
            .map_err(cache_error)?
            .query_row(
                "SELECT stored_at, value FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(cache_error)?;

        let Some((stored_at, value)) = row else {
            return Ok(None);
        };
        let Ok(stored_at) = DateTime::parse_from_rfc3339(&stored_at) else {
            return Ok(None);
        };
        Ok(Some(CacheEntry {
            stored_at: stored_at.with_timezone(&Utc),
            value: serde_json::from_str(&value)?,
        }))
    }

    fn store(&self, namespace: &str, key: &str, entry: &CacheEntry) -> homefront_scanner::error::Result<()> {
        self.conn()
            .map_err(cache_error)?
            .execute(
                "INSERT INTO cache_entries (namespace, key, stored_at, value) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(namespace, key) DO UPDATE SET stored_at = excluded.stored_at, value = excluded.value",
                params![
                    namespace,
                    key,
                    entry.stored_at.to_rfc3339(),
                    serde_json::to_string(&entry.value)?
                ],
            )
            .map_err(cache_error)?;
        Ok(())
    }
}
