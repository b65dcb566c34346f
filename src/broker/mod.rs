//! Message broker abstraction
//!
//! The pipeline talks to a partitioned, ordered-per-partition log through
//! two small traits: [`Publisher`] for the ingress side and
//! [`Subscription`] for a consumer-group member. The in-process
//! [`MemoryBroker`] backs local development and tests; a Kafka-compatible
//! backend is available behind the `kafka` feature.

pub mod memory;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use memory::MemoryBroker;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a broker backend
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker connection closed")]
    Closed,

    #[error("Broker read failed: {0}")]
    Read(String),

    #[error("Broker publish failed: {0}")]
    Publish(String),

    #[error("Broker client setup failed: {0}")]
    Setup(String),
}

/// An outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
}

impl Record {
    pub fn keyed(key: impl Into<Vec<u8>>, value: Vec<u8>) -> Self {
        Record {
            key: Some(key.into()),
            value,
        }
    }
}

/// A message handed to a consumer, with its log position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
}

/// Producer side of the broker
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Append records to `topic`, routing each by its key
    async fn publish(&self, topic: &str, records: Vec<Record>) -> Result<(), BrokerError>;
}

/// One consumer-group member reading a single topic
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message. Returning a message commits its offset.
    async fn next_message(&mut self) -> Result<Delivery, BrokerError>;
}
