//! Append-only access log, one bucket per calendar date.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("access log: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("access log directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown access type in log: {0}")]
    UnknownKind(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Temporary,
    Permanent,
}

impl AccessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessKind::Temporary => "temporary",
            AccessKind::Permanent => "permanent",
        }
    }

    fn parse(s: &str) -> Result<Self, AuditError> {
        match s {
            "temporary" => Ok(AccessKind::Temporary),
            "permanent" => Ok(AccessKind::Permanent),
            other => Err(AuditError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub name: String,
    /// `HH:MM:SS`, UTC.
    pub time: String,
    #[serde(rename = "type")]
    pub kind: AccessKind,
}

impl AccessLogEntry {
    /// Entry for `name` admitted at `at`. Returns the date bucket alongside.
    pub fn at(name: &str, kind: AccessKind, at: DateTime<Utc>) -> (NaiveDate, Self) {
        (
            at.date_naive(),
            Self {
                name: name.to_string(),
                time: at.format("%H:%M:%S").to_string(),
                kind,
            },
        )
    }
}

pub trait AuditSink: Send + Sync {
    fn append_access_entry(&self, date: NaiveDate, entry: &AccessLogEntry) -> Result<(), AuditError>;
    fn entries_for(&self, date: NaiveDate) -> Result<Vec<AccessLogEntry>, AuditError>;
}

pub struct SqliteAccessLog {
    conn: Mutex<Connection>,
}

impl SqliteAccessLog {
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let log = Self::with_connection(Connection::open(path)?)?;
        tracing::info!(path = %path.display(), "access log opened");
        Ok(log)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, AuditError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS access_log (
                 id    INTEGER PRIMARY KEY AUTOINCREMENT,
                 date  TEXT NOT NULL,
                 name  TEXT NOT NULL,
                 time  TEXT NOT NULL,
                 kind  TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS access_log_date ON access_log(date);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl AuditSink for SqliteAccessLog {
    fn append_access_entry(&self, date: NaiveDate, entry: &AccessLogEntry) -> Result<(), AuditError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO access_log (date, name, time, kind) VALUES (?1, ?2, ?3, ?4)",
            params![date.to_string(), entry.name, entry.time, entry.kind.as_str()],
        )?;
        tracing::info!(name = %entry.name, time = %entry.time, kind = entry.kind.as_str(), "access logged");
        Ok(())
    }

    fn entries_for(&self, date: NaiveDate) -> Result<Vec<AccessLogEntry>, AuditError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare("SELECT name, time, kind FROM access_log WHERE date = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![date.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (name, time, kind) = row?;
            entries.push(AccessLogEntry {
                name,
                time,
                kind: AccessKind::parse(&kind)?,
            });
        }
        Ok(entries)
    }
}
