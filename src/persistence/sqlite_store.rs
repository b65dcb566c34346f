//! SQLite implementation of the alert and counter stores

use super::{AlertRow, AlertStore, CounterStore, PersistenceError};
use crate::models::{AlertRecord, AlertStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// VM instructions between deadline checks of a running statement
const DEADLINE_CHECK_OPS: i32 = 1_000;

const UPSERT_ALERT: &str = "
    INSERT INTO alerts
        (id, tenant_id, rule_id, severity, status, title, description, event_data, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, 'open', ?5, ?6, ?7, ?8, ?8)
    ON CONFLICT (id) DO UPDATE
    SET severity = excluded.severity,
        status = excluded.status,
        title = excluded.title,
        description = excluded.description,
        event_data = excluded.event_data,
        updated_at = excluded.updated_at";

/// SQLite-backed storage for alerts and counters
///
/// A single connection guarded by a mutex; each statement is atomic, so the
/// upsert and the counter increment need no further locking.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and initialize the schema
    ///
    /// `busy_timeout` bounds how long a write waits on a locked database.
    pub fn open<P: AsRef<Path>>(db_path: P, busy_timeout: Duration) -> Result<Self, PersistenceError> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(busy_timeout)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite database (useful for testing)
    pub fn in_memory() -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| PersistenceError::InvalidData(format!("Invalid timestamp: {}", raw)))
}

const SELECT_ALERT: &str = "
    SELECT id, tenant_id, rule_id, severity, status, title, description,
           event_data, created_at, updated_at
    FROM alerts";

type AlertColumns = (
    String,
    String,
    Option<String>,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
);

fn read_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn into_row(columns: AlertColumns) -> Result<AlertRow, PersistenceError> {
    let (id, tenant_id, rule_id, severity, status, title, description, event_data, created, updated) =
        columns;
    Ok(AlertRow {
        id,
        tenant_id,
        rule_id,
        severity,
        status: status.parse().map_err(PersistenceError::InvalidData)?,
        title,
        description,
        event_data,
        created_at: parse_timestamp(&created)?,
        updated_at: parse_timestamp(&updated)?,
    })
}

fn execute_upsert(
    conn: &Connection,
    alert: &AlertRecord,
    now: DateTime<Utc>,
) -> Result<usize, rusqlite::Error> {
    conn.execute(
        UPSERT_ALERT,
        params![
            alert.id,
            alert.tenant_id,
            alert.rule_id,
            alert.severity,
            alert.title,
            alert.description,
            alert.event_data,
            format_timestamp(now),
        ],
    )
}

impl AlertStore for SqliteStore {
    fn upsert_alert(&self, alert: &AlertRecord, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        let conn = self.conn();
        execute_upsert(&conn, alert, now)?;
        Ok(())
    }

    /// The deadline is checked once the connection is free, and a
    /// statement still running at the deadline is interrupted and rolled
    /// back
    fn upsert_alert_before(
        &self,
        alert: &AlertRecord,
        now: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<(), PersistenceError> {
        let conn = self.conn();
        if Instant::now() >= deadline {
            return Err(PersistenceError::DeadlineExceeded);
        }

        conn.progress_handler(DEADLINE_CHECK_OPS, Some(move || Instant::now() >= deadline));
        let result = execute_upsert(&conn, alert, now);
        conn.progress_handler(0, None::<fn() -> bool>);

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) => {
                Err(PersistenceError::DeadlineExceeded)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_alert(&self, id: &str) -> Result<Option<AlertRow>, PersistenceError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?", SELECT_ALERT))?;

        match stmt.query_row(params![id], read_columns) {
            Ok(columns) => Ok(Some(into_row(columns)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_alerts(&self, tenant_id: &str) -> Result<Vec<AlertRow>, PersistenceError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE tenant_id = ? ORDER BY created_at, id",
            SELECT_ALERT
        ))?;

        let rows = stmt.query_map(params![tenant_id], read_columns)?;
        let mut alerts = Vec::new();
        for columns in rows {
            alerts.push(into_row(columns?)?);
        }
        Ok(alerts)
    }

    fn set_status(
        &self,
        id: &str,
        status: AlertStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, PersistenceError> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE alerts SET status = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), format_timestamp(now), id],
        )?;
        Ok(changed > 0)
    }

    fn count_alerts(&self) -> Result<usize, PersistenceError> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl CounterStore for SqliteStore {
    fn increment(&self, key: &str, by: i64) -> Result<i64, PersistenceError> {
        let conn = self.conn();
        let value = conn.query_row(
            "INSERT INTO counters (name, total) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET total = total + excluded.total
             RETURNING total",
            params![key, by],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    fn get(&self, key: &str) -> Result<i64, PersistenceError> {
        let conn = self.conn();
        match conn.query_row(
            "SELECT total FROM counters WHERE name = ?",
            params![key],
            |row| row.get(0),
        ) {
            Ok(value) => Ok(value),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}
