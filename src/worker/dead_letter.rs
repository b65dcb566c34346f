//! Dead-letter forwarding for the hardened pipeline mode

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::HandlerError;
use crate::broker::{Delivery, Publisher, Record};

/// Envelope written to the dead-letter topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    pub source_topic: String,
    pub partition: i32,
    pub offset: i64,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    /// Original payload, lossily decoded as UTF-8
    pub payload: String,
}

/// Republishes messages a worker failed to handle
pub struct DeadLetter {
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl DeadLetter {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        DeadLetter {
            publisher,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish the failed delivery; a failure here is only logged
    pub async fn forward(&self, delivery: &Delivery, error: &HandlerError) {
        let message = DeadLetterMessage {
            source_topic: delivery.topic.clone(),
            partition: delivery.partition,
            offset: delivery.offset,
            error: error.to_string(),
            failed_at: Utc::now(),
            payload: String::from_utf8_lossy(&delivery.value).into_owned(),
        };

        let value = match serde_json::to_vec(&message) {
            Ok(value) => value,
            Err(e) => {
                log::error!("Failed to encode dead-letter message: {}", e);
                return;
            }
        };

        let record = Record {
            key: delivery.key.clone(),
            value,
        };
        if let Err(e) = self.publisher.publish(&self.topic, vec![record]).await {
            log::error!(
                "Failed to dead-letter topic={} partition={} offset={}: {}",
                delivery.topic,
                delivery.partition,
                delivery.offset,
                e
            );
        }
    }
}
