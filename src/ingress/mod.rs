//! Ingress: enrich raw event batches and publish them to the events topic
//!
//! Publication is best-effort by default. A publish failure is logged and
//! swallowed, and the caller is still told the whole batch was accepted.

pub mod http;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::broker::{BrokerError, Publisher, Record};
use crate::models::RawEvent;
use crate::persistence::{counter_key, CounterStore};

/// Errors returned to the ingress caller
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("events must be a non-empty array")]
    EmptyBatch,

    #[error("event at index {0} is not a JSON object")]
    NotAnObject(usize),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Only raised in acknowledged mode
    #[error("failed to enqueue events: {0}")]
    Publish(#[from] BrokerError),
}

impl IngestError {
    /// Whether the request itself was invalid (as opposed to a downstream failure)
    pub fn is_validation(&self) -> bool {
        matches!(self, IngestError::EmptyBatch | IngestError::NotAnObject(_))
    }
}

/// How the ingress treats broker publish failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Swallow publish errors and report the batch as accepted
    BestEffort,
    /// Fail the request when the broker does not acknowledge the batch
    Acknowledged,
}

/// Result of an accepted ingest call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReceipt {
    /// Number of events in the request, not the number published
    pub event_count: usize,
    pub tenant_id: String,
}

/// Enriches and publishes event batches for a tenant
pub struct Ingestor {
    publisher: Arc<dyn Publisher>,
    counters: Arc<dyn CounterStore>,
    topic: String,
    mode: PublishMode,
}

impl Ingestor {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        counters: Arc<dyn CounterStore>,
        topic: impl Into<String>,
        mode: PublishMode,
    ) -> Self {
        Ingestor {
            publisher,
            counters,
            topic: topic.into(),
            mode,
        }
    }

    /// Enrich each event, publish one message per event keyed by tenant,
    /// and bump the tenant's event counter
    ///
    /// Validation happens before any side effect: an empty batch or a
    /// non-object element is rejected outright.
    pub async fn ingest(
        &self,
        tenant_id: &str,
        events: Vec<Value>,
    ) -> Result<IngestReceipt, IngestError> {
        if events.is_empty() {
            return Err(IngestError::EmptyBatch);
        }

        let event_count = events.len();
        let ingested_at = Utc::now();

        let mut records = Vec::with_capacity(event_count);
        for (position, value) in events.into_iter().enumerate() {
            let mut event = RawEvent::from_value(value).ok_or(IngestError::NotAnObject(position))?;
            event.enrich(tenant_id, ingested_at);
            records.push(Record::keyed(tenant_id, event.to_bytes()?));
        }

        let published = self.publisher.publish(&self.topic, records).await;
        if let Err(ref e) = published {
            log::warn!(
                "Failed to publish {} event(s) for tenant {}: {}",
                event_count,
                tenant_id,
                e
            );
        }

        self.bump_counter(tenant_id, event_count).await;

        match (published, self.mode) {
            (Err(e), PublishMode::Acknowledged) => Err(e.into()),
            _ => Ok(IngestReceipt {
                event_count,
                tenant_id: tenant_id.to_string(),
            }),
        }
    }

    async fn bump_counter(&self, tenant_id: &str, by: usize) {
        let counters = Arc::clone(&self.counters);
        let key = counter_key(tenant_id);

        let result = tokio::task::spawn_blocking(move || counters.increment(&key, by as i64)).await;
        match result {
            Ok(Ok(total)) => log::debug!("Tenant {} event count now {}", tenant_id, total),
            Ok(Err(e)) => log::warn!("Failed to update event counter for {}: {}", tenant_id, e),
            Err(e) => log::warn!("Event counter task failed for {}: {}", tenant_id, e),
        }
    }
}
