//! Append-only audit log of every mutation attempt.
//!
//! [`OperationLog`] is a service with its own SQLite connection and an explicit
//! lifecycle: [`OperationLog::open`] at startup, [`OperationLog::close`] at
//! shutdown. The coordinator holds it by `Arc` and appends one
//! [`OperationRecord`] per store call it makes. Records are never updated or
//! deleted.

use anyhow::Context;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::error::{GraphError, Result};

/// What kind of mutation was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Distill,
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Distill => "distill",
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "distill" => Ok(Self::Distill),
            "create" => Ok(Self::Create),
            "read" => Ok(Self::Read),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(format!("unknown operation: {s}")),
        }
    }
}

/// Which logical table a mutation targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Entities,
    Relations,
    Knowledge,
    Observations,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entities => "entities",
            Self::Relations => "relations",
            Self::Knowledge => "knowledge",
            Self::Observations => "observations",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "entities" => Ok(Self::Entities),
            "relations" => Ok(Self::Relations),
            "knowledge" => Ok(Self::Knowledge),
            "observations" => Ok(Self::Observations),
            _ => Err(format!("unknown table: {s}")),
        }
    }
}

/// One audit entry, matching the `operation_log` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Row id, assigned on append.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub operation: Operation,
    pub table: Table,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

impl OperationRecord {
    pub fn succeeded(operation: Operation, table: Table, message: impl Into<String>) -> Self {
        Self {
            id: None,
            operation,
            table,
            success: true,
            message: Some(message.into()),
            error: None,
            timestamp: super::now(),
        }
    }

    pub fn failed(operation: Operation, table: Table, error: impl Into<String>) -> Self {
        Self {
            id: None,
            operation,
            table,
            success: false,
            message: None,
            error: Some(error.into()),
            timestamp: super::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Handle to the audit log. Cheap to share behind an `Arc`.
pub struct OperationLog {
    conn: Mutex<Option<Connection>>,
}

impl OperationLog {
    /// Open the log inside the database file at `path` (normally the graph
    /// database itself, in WAL mode).
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open operation log at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_millis(5000))?;
        crate::db::schema::init_schema(&conn).context("failed to initialize log schema")?;
        tracing::debug!(path = %path.display(), "operation log opened");
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory log.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory log")?;
        crate::db::schema::init_schema(&conn).context("failed to initialize log schema")?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().map_err(|_| GraphError::LockPoisoned)?;
        let conn = guard.as_ref().ok_or(GraphError::LogClosed)?;
        f(conn)
    }

    /// Append a record. Returns the new row id.
    pub fn append(&self, record: &OperationRecord) -> Result<i64> {
        tracing::debug!(
            operation = %record.operation,
            table = %record.table,
            success = record.success,
            "operation recorded"
        );
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO operation_log (operation, table_name, success, message, error, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.operation.as_str(),
                    record.table.as_str(),
                    record.success,
                    record.message,
                    record.error,
                    record.timestamp,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Most recent records first.
    pub fn recent(&self, limit: usize) -> Result<Vec<OperationRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, operation, table_name, success, message, error, created_at \
                 FROM operation_log ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, op, table, success, message, error, timestamp)| {
                    Ok(OperationRecord {
                        id: Some(id),
                        operation: op.parse().map_err(GraphError::Validation)?,
                        table: table.parse().map_err(GraphError::Validation)?,
                        success,
                        message,
                        error,
                        timestamp,
                    })
                })
                .collect()
        })
    }

    /// Number of records, optionally only failures.
    pub fn count(&self, failures_only: bool) -> Result<u64> {
        self.with_conn(|conn| {
            let sql = if failures_only {
                "SELECT COUNT(*) FROM operation_log WHERE success = 0"
            } else {
                "SELECT COUNT(*) FROM operation_log"
            };
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }

    /// Flush the WAL and release the connection. Later appends fail with
    /// [`GraphError::LogClosed`]. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().map_err(|_| GraphError::LockPoisoned)?;
        let Some(conn) = guard.take() else {
            return Ok(());
        };
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        conn.close().map_err(|(_, e)| GraphError::Database(e))?;
        tracing::debug!("operation log closed");
        Ok(())
    }
}
