//! Kafka-compatible broker backend built on rdkafka

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;

use super::{BrokerError, Delivery, Publisher, Record, Subscription};

/// Producer writing to a Kafka cluster; partitions by key hash
pub struct KafkaPublisher {
    producer: FutureProducer,
    queue_timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(brokers: &[String]) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("message.timeout.ms", "5000")
            .set("partitioner", "murmur2_random")
            .create()
            .map_err(|e| BrokerError::Setup(e.to_string()))?;

        Ok(KafkaPublisher {
            producer,
            queue_timeout: Duration::from_secs(5),
        })
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    /// Queue the whole batch, then wait for every delivery report
    async fn publish(&self, topic: &str, records: Vec<Record>) -> Result<(), BrokerError> {
        let deliveries = records.iter().map(|record| async move {
            let sent = match &record.key {
                Some(key) => {
                    self.producer
                        .send(
                            FutureRecord::to(topic).payload(&record.value).key(key),
                            self.queue_timeout,
                        )
                        .await
                }
                None => {
                    self.producer
                        .send(
                            FutureRecord::<(), Vec<u8>>::to(topic).payload(&record.value),
                            self.queue_timeout,
                        )
                        .await
                }
            };
            sent.map_err(|(err, _)| BrokerError::Publish(err.to_string()))
        });

        try_join_all(deliveries).await?;
        Ok(())
    }
}

/// Consumer-group member; offsets are auto-committed after each read
pub struct KafkaSubscription {
    consumer: StreamConsumer,
}

impl KafkaSubscription {
    pub fn new(brokers: &[String], group: &str, topic: &str) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("group.id", group)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| BrokerError::Setup(e.to_string()))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::Setup(e.to_string()))?;

        Ok(KafkaSubscription { consumer })
    }
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn next_message(&mut self) -> Result<Delivery, BrokerError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| BrokerError::Read(e.to_string()))?;

        Ok(Delivery {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }
}
