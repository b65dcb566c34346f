//! Event indexer: forwards each events-topic message to the search index

use std::sync::Arc;

use async_trait::async_trait;

use super::{HandlerError, MessageHandler};
use crate::broker::Delivery;
use crate::index::DocumentIndex;

/// Writes every message verbatim as one document
///
/// A failed write is not retried; the message is already consumed.
pub struct EventIndexer {
    index: Arc<dyn DocumentIndex>,
    collection: String,
}

impl EventIndexer {
    pub fn new(index: Arc<dyn DocumentIndex>, collection: impl Into<String>) -> Self {
        EventIndexer {
            index,
            collection: collection.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for EventIndexer {
    fn name(&self) -> &'static str {
        "event indexer"
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        self.index
            .create_document(&self.collection, delivery.value.clone())
            .await?;
        Ok(())
    }
}
