//! SQLite deletion history in WAL mode, queried by `dsk history`.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};

use crate::core::errors::{DskError, Result};

/// History store for deletions, failed deletions and lifecycle events.
pub struct SqliteLogger {
    conn: Connection,
    path: PathBuf,
}

impl SqliteLogger {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DskError::io(parent, source))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing database for reading; a missing file is not created.
    pub fn open_existing(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DskError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no history recorded yet"),
            ));
        }
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ──────────────────── maintenance_log ────────────────────

    pub fn log_history(&self, row: &HistoryRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO maintenance_log (
                timestamp, event_type, severity, device_id, action, recording_id,
                title, scheduled, reason, size_bytes, dry_run, success,
                error_code, error_message, details
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            )?
            .execute(params![
                row.timestamp,
                row.event_type,
                row.severity,
                row.device_id,
                row.action,
                row.recording_id,
                row.title,
                row.scheduled,
                row.reason,
                row.size_bytes,
                row.dry_run,
                row.success,
                row.error_code,
                row.error_message,
                row.details,
            ])?;
        Ok(())
    }

    /// Most recent rows, newest first.
    pub fn recent_history(&self, limit: u32) -> Result<Vec<HistoryRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, event_type, severity, device_id, action, recording_id,
                    title, scheduled, reason, size_bytes, dry_run, success,
                    error_code, error_message, details
             FROM maintenance_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(HistoryRow {
                    timestamp: row.get(0)?,
                    event_type: row.get(1)?,
                    severity: row.get(2)?,
                    device_id: row.get(3)?,
                    action: row.get(4)?,
                    recording_id: row.get(5)?,
                    title: row.get(6)?,
                    scheduled: row.get(7)?,
                    reason: row.get(8)?,
                    size_bytes: row.get(9)?,
                    dry_run: row.get(10)?,
                    success: row.get(11)?,
                    error_code: row.get(12)?,
                    error_message: row.get(13)?,
                    details: row.get(14)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Real (non dry-run) deletions since an RFC 3339 timestamp.
    pub fn count_deletions_since(&self, since: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM maintenance_log
             WHERE action = 'deleted' AND dry_run = 0 AND success = 1 AND timestamp >= ?1",
            params![since],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Bytes reclaimed by real deletions since an RFC 3339 timestamp.
    pub fn bytes_freed_since(&self, since: &str) -> Result<i64> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM maintenance_log
             WHERE action = 'deleted' AND dry_run = 0 AND success = 1 AND timestamp >= ?1",
            params![since],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Drop rows older than `retention_days`. Returns the number removed.
    pub fn prune_history(&self, retention_days: u32) -> Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let cutoff = cutoff.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let deleted = self.conn.execute(
            "DELETE FROM maintenance_log WHERE timestamp < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }

    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }
}

/// Row for the `maintenance_log` table.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct HistoryRow {
    pub timestamp: String,
    pub event_type: String,
    pub severity: String,
    pub device_id: Option<String>,
    pub action: Option<String>,
    pub recording_id: Option<String>,
    pub title: Option<String>,
    pub scheduled: Option<i64>,
    pub reason: Option<String>,
    pub size_bytes: Option<i64>,
    pub dry_run: i32,
    pub success: i32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub details: Option<String>,
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[DSK-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS maintenance_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            device_id TEXT,
            action TEXT,
            recording_id TEXT,
            title TEXT,
            scheduled INTEGER,
            reason TEXT,
            size_bytes INTEGER,
            dry_run INTEGER NOT NULL DEFAULT 0,
            success INTEGER NOT NULL DEFAULT 1,
            error_code TEXT,
            error_message TEXT,
            details TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_maint_timestamp ON maintenance_log(timestamp);
        CREATE INDEX IF NOT EXISTS idx_maint_device_time ON maintenance_log(device_id, timestamp);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (tempfile::TempDir, SqliteLogger) {
        let dir = tempfile::tempdir().unwrap();
        let logger = SqliteLogger::open(&dir.path().join("history.db")).unwrap();
        (dir, logger)
    }

    fn deletion(recording_id: &str, size: i64, dry_run: bool) -> HistoryRow {
        HistoryRow {
            timestamp: "2026-03-01T12:00:00.000Z".to_string(),
            event_type: "maintenance".to_string(),
            severity: "info".to_string(),
            device_id: Some("1051ABCD".to_string()),
            action: Some("deleted".to_string()),
            recording_id: Some(recording_id.to_string()),
            title: Some("Nightly News".to_string()),
            scheduled: Some(1_700_000_000),
            reason: Some("to free space".to_string()),
            size_bytes: Some(size),
            dry_run: i32::from(dry_run),
            success: 1,
            ..HistoryRow::default()
        }
    }

    #[test]
    fn schema_created_and_wal_active() {
        let (_dir, db) = temp_db();
        assert!(db.is_wal_mode());
        assert!(db.recent_history(10).unwrap().is_empty());
    }

    #[test]
    fn recent_history_newest_first() {
        let (_dir, db) = temp_db();
        db.log_history(&deletion("a", 10, false)).unwrap();
        db.log_history(&deletion("b", 20, false)).unwrap();

        let rows = db.recent_history(10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].recording_id.as_deref(), Some("b"));
        assert_eq!(rows[1].reason.as_deref(), Some("to free space"));
        assert_eq!(db.recent_history(1).unwrap().len(), 1);
    }

    #[test]
    fn aggregates_ignore_dry_runs() {
        let (_dir, db) = temp_db();
        db.log_history(&deletion("a", 1_000, false)).unwrap();
        db.log_history(&deletion("b", 2_000, true)).unwrap();
        db.log_history(&deletion("c", 4_000, false)).unwrap();

        let since = "2020-01-01T00:00:00Z";
        assert_eq!(db.count_deletions_since(since).unwrap(), 2);
        assert_eq!(db.bytes_freed_since(since).unwrap(), 5_000);
    }

    #[test]
    fn prune_drops_old_rows() {
        let (_dir, db) = temp_db();
        let mut old = deletion("old", 1, false);
        old.timestamp = "2001-01-01T00:00:00.000Z".to_string();
        db.log_history(&old).unwrap();
        db.log_history(&deletion("new", 1, false)).unwrap();
        assert_eq!(db.prune_history(365).unwrap(), 1);
        assert_eq!(db.recent_history(10).unwrap().len(), 1);
    }

    #[test]
    fn open_existing_requires_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SqliteLogger::open_existing(&dir.path().join("absent.db")).is_err());
    }

    #[test]
    fn idempotent_schema_creation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twice.db");
        SqliteLogger::open(&path).unwrap();
        let db = SqliteLogger::open(&path).unwrap();
        assert!(db.is_wal_mode());
    }
}
