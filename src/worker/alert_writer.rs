//! Alert writer: parses alerts-topic messages and upserts them by id

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use super::{HandlerError, MessageHandler};
use crate::broker::Delivery;
use crate::models::AlertRecord;
use crate::persistence::{AlertStore, PersistenceError};

/// Persists alerts into the relational store
///
/// Malformed payloads and store failures are reported per message and the
/// message is skipped. Every write leaves the row `open`, including replays
/// of an alert that was already resolved.
///
/// Writes carry a deadline of `write_timeout` that the store enforces, so a
/// write reported as timed out never commits later. The handler waits for
/// the store to give that answer before taking the next message.
pub struct AlertWriter {
    store: Arc<dyn AlertStore>,
    write_timeout: Duration,
}

impl AlertWriter {
    pub fn new(store: Arc<dyn AlertStore>, write_timeout: Duration) -> Self {
        AlertWriter {
            store,
            write_timeout,
        }
    }

    /// Parse one payload and upsert it; returns the id that was written
    pub async fn persist(&self, payload: &[u8]) -> Result<String, HandlerError> {
        let record = AlertRecord::from_payload(payload)?;
        let id = record.id.clone();

        let store = Arc::clone(&self.store);
        let deadline = Instant::now() + self.write_timeout;
        let write = tokio::task::spawn_blocking(move || {
            store.upsert_alert_before(&record, Utc::now(), deadline)
        });

        match write.await? {
            Ok(()) => Ok(id),
            Err(PersistenceError::DeadlineExceeded) => Err(HandlerError::Timeout(self.write_timeout)),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl MessageHandler for AlertWriter {
    fn name(&self) -> &'static str {
        "alert writer"
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let id = self.persist(&delivery.value).await?;
        log::debug!("Persisted alert {} from offset {}", id, delivery.offset);
        Ok(())
    }
}
