//! Wiring of the ingestion pipeline from configuration
//!
//! Owns the shared handles (broker client, store, index client) and hands
//! them to each component through its constructor.

use std::sync::Arc;

use thiserror::Error;

use crate::broker::{BrokerError, MemoryBroker, Publisher, Subscription};
use crate::config::{BrokerKind, Config, PipelineMode};
use crate::index::{IndexError, OpenSearchIndex};
use crate::ingress::{Ingestor, PublishMode};
use crate::persistence::{PersistenceError, SqliteStore};
use crate::worker::{run_consumer, AlertWriter, DeadLetter, EventIndexer, ReadErrorPolicy, WorkerError};

/// Errors raised while assembling the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Store setup failed: {0}")]
    Store(#[from] PersistenceError),

    #[error("Index client setup failed: {0}")]
    Index(#[from] IndexError),

    #[error("Broker setup failed: {0}")]
    Broker(#[from] BrokerError),
}

enum BrokerHandle {
    Memory(MemoryBroker),
    #[cfg(feature = "kafka")]
    Kafka(Vec<String>),
}

impl BrokerHandle {
    fn connect(config: &Config) -> Result<(Self, Arc<dyn Publisher>), BrokerError> {
        match config.broker.kind {
            BrokerKind::Memory => {
                let broker = MemoryBroker::with_retention(
                    config.broker.partitions,
                    config.broker.memory_retention,
                );
                let publisher: Arc<dyn Publisher> = Arc::new(broker.clone());
                Ok((BrokerHandle::Memory(broker), publisher))
            }
            #[cfg(feature = "kafka")]
            BrokerKind::Kafka => {
                let publisher = crate::broker::kafka::KafkaPublisher::new(&config.broker.brokers)?;
                Ok((
                    BrokerHandle::Kafka(config.broker.brokers.clone()),
                    Arc::new(publisher),
                ))
            }
            #[cfg(not(feature = "kafka"))]
            BrokerKind::Kafka => Err(BrokerError::Setup(
                "built without the `kafka` feature".to_string(),
            )),
        }
    }

    fn subscribe(&self, group: &str, topic: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        match self {
            BrokerHandle::Memory(broker) => Ok(Box::new(broker.subscribe(group, topic))),
            #[cfg(feature = "kafka")]
            BrokerHandle::Kafka(brokers) => Ok(Box::new(
                crate::broker::kafka::KafkaSubscription::new(brokers, group, topic)?,
            )),
        }
    }
}

/// A fully wired pipeline: ingress plus both consumer workers
pub struct Pipeline {
    config: Config,
    broker: BrokerHandle,
    store: Arc<SqliteStore>,
    ingestor: Arc<Ingestor>,
    indexer: EventIndexer,
    alert_writer: AlertWriter,
    dead_letter: Option<DeadLetter>,
}

impl Pipeline {
    /// Build from configuration, opening the store at `config.store.path`
    pub fn from_config(config: Config) -> Result<Self, PipelineError> {
        let store = Arc::new(SqliteStore::open(
            &config.store.path,
            config.store.write_timeout(),
        )?);
        Self::with_store(config, store)
    }

    /// Build around an already-open store
    pub fn with_store(config: Config, store: Arc<SqliteStore>) -> Result<Self, PipelineError> {
        let (broker, publisher) = BrokerHandle::connect(&config)?;

        let index = OpenSearchIndex::new(&config.index.url, config.index.timeout())?;
        let indexer = EventIndexer::new(Arc::new(index), config.index.collection.clone());
        let alert_writer = AlertWriter::new(store.clone(), config.store.write_timeout());

        let publish_mode = match config.pipeline.mode {
            PipelineMode::Legacy => PublishMode::BestEffort,
            PipelineMode::Hardened => PublishMode::Acknowledged,
        };
        let ingestor = Arc::new(Ingestor::new(
            publisher.clone(),
            store.clone(),
            config.broker.events_topic.clone(),
            publish_mode,
        ));

        let dead_letter = match (config.pipeline.mode, &config.pipeline.dead_letter_topic) {
            (PipelineMode::Hardened, Some(topic)) => Some(DeadLetter::new(publisher, topic.clone())),
            _ => None,
        };

        Ok(Pipeline {
            config,
            broker,
            store,
            ingestor,
            indexer,
            alert_writer,
            dead_letter,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ingestor(&self) -> Arc<Ingestor> {
        Arc::clone(&self.ingestor)
    }

    pub fn store(&self) -> Arc<SqliteStore> {
        Arc::clone(&self.store)
    }

    /// The in-memory broker, when that backend is in use
    pub fn memory_broker(&self) -> Option<&MemoryBroker> {
        match &self.broker {
            BrokerHandle::Memory(broker) => Some(broker),
            #[cfg(feature = "kafka")]
            BrokerHandle::Kafka(_) => None,
        }
    }

    /// The indexer always retries reads after a fixed backoff
    pub fn indexer_policy(&self) -> ReadErrorPolicy {
        ReadErrorPolicy::Retry {
            backoff: self.config.pipeline.read_backoff(),
        }
    }

    /// In legacy mode a read error is fatal to the alert writer; hardened
    /// mode applies the indexer's retry policy to both workers
    pub fn alert_writer_policy(&self) -> ReadErrorPolicy {
        match self.config.pipeline.mode {
            PipelineMode::Legacy => ReadErrorPolicy::Exit,
            PipelineMode::Hardened => self.indexer_policy(),
        }
    }

    /// Consume the events topic into the search index
    pub async fn run_event_indexer(&self) -> Result<(), WorkerError> {
        let broker = &self.config.broker;
        let mut subscription = self
            .broker
            .subscribe(&broker.events_consumer_group, &broker.events_topic)
            .map_err(WorkerError::Subscribe)?;

        log::info!("Event indexer consuming topic={}", broker.events_topic);
        run_consumer(
            &mut *subscription,
            &self.indexer,
            self.indexer_policy(),
            self.dead_letter.as_ref(),
        )
        .await
    }

    /// Consume the alerts topic into the relational store
    pub async fn run_alert_writer(&self) -> Result<(), WorkerError> {
        let broker = &self.config.broker;
        let mut subscription = self
            .broker
            .subscribe(&broker.alerts_consumer_group, &broker.alerts_topic)
            .map_err(WorkerError::Subscribe)?;

        log::info!("Alert writer consuming topic={}", broker.alerts_topic);
        run_consumer(
            &mut *subscription,
            &self.alert_writer,
            self.alert_writer_policy(),
            self.dead_letter.as_ref(),
        )
        .await
    }

    /// Close the in-memory broker so blocked readers observe a read error
    pub fn close(&self) {
        if let Some(broker) = self.memory_broker() {
            broker.close();
        }
    }
}
