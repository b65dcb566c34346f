pub mod broker;
pub mod coercion;
pub mod config;
pub mod index;
pub mod ingress;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod worker;

// Re-export commonly used types
pub use broker::{Delivery, MemoryBroker, Publisher, Record, Subscription};
pub use config::Config;
pub use ingress::{IngestReceipt, Ingestor, PublishMode};
pub use models::{AlertRecord, AlertStatus, RawEvent};
pub use persistence::{AlertStore, CounterStore, SqliteStore};
pub use pipeline::Pipeline;
pub use worker::{AlertWriter, EventIndexer, ReadErrorPolicy};
