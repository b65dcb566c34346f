//! Persistence module for alert rows and ingest counters
//!
//! The alert writer owns no schema beyond the `alerts` table shared with
//! the case-management API, and the ingress keeps approximate per-tenant
//! counters next to it.

pub mod sqlite_store;

pub use sqlite_store::SqliteStore;

use crate::models::{AlertRecord, AlertStatus};
use chrono::{DateTime, Utc};
use std::time::Instant;
use thiserror::Error;

/// Errors that can occur during persistence operations
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid data in database: {0}")]
    InvalidData(String),

    /// The write was abandoned at its deadline and nothing was committed
    #[error("Write deadline passed")]
    DeadlineExceeded,
}

/// An alert row as stored
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRow {
    pub id: String,
    pub tenant_id: String,
    pub rule_id: Option<String>,
    pub severity: String,
    pub status: AlertStatus,
    pub title: String,
    pub description: String,
    pub event_data: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Relational sink for alerts
pub trait AlertStore: Send + Sync {
    /// Insert the alert, or update the existing row with the same id
    ///
    /// New rows start `open`. On conflict, severity, title, description,
    /// event_data and updated_at are replaced and status is reset to `open`;
    /// tenant_id, rule_id and created_at keep their first-seen values.
    fn upsert_alert(&self, alert: &AlertRecord, now: DateTime<Utc>) -> Result<(), PersistenceError>;

    /// [`upsert_alert`](Self::upsert_alert) that gives up once `deadline`
    /// passes
    ///
    /// `DeadlineExceeded` means the row was not written. Stores that can
    /// abort a running statement should override this; the default only
    /// checks the deadline before starting.
    fn upsert_alert_before(
        &self,
        alert: &AlertRecord,
        now: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<(), PersistenceError> {
        if Instant::now() >= deadline {
            return Err(PersistenceError::DeadlineExceeded);
        }
        self.upsert_alert(alert, now)
    }

    fn get_alert(&self, id: &str) -> Result<Option<AlertRow>, PersistenceError>;

    /// A tenant's alerts, oldest first
    fn list_alerts(&self, tenant_id: &str) -> Result<Vec<AlertRow>, PersistenceError>;

    /// Change an alert's status, as the case-management API does
    ///
    /// Returns `false` when no row has that id.
    fn set_status(
        &self,
        id: &str,
        status: AlertStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, PersistenceError>;

    fn count_alerts(&self) -> Result<usize, PersistenceError>;
}

/// Atomic counters for approximate ingest telemetry
pub trait CounterStore: Send + Sync {
    /// Add `by` to the counter and return the new value
    fn increment(&self, key: &str, by: i64) -> Result<i64, PersistenceError>;

    /// Current value; missing counters read as zero
    fn get(&self, key: &str) -> Result<i64, PersistenceError>;
}

/// Counter key for a tenant's ingested event count
pub fn counter_key(tenant_id: &str) -> String {
    format!("events:{}:count", tenant_id)
}
