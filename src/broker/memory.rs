//! In-process partitioned log
//!
//! Mirrors the delivery model of a Kafka-style broker closely enough for
//! the workers: keyed records hash to a fixed partition, order is kept per
//! partition, and each consumer group tracks its own offsets. Members of
//! the same group share those offsets, so every message goes to exactly one
//! member of a group.
//!
//! Records are released once every group subscribed to the topic has read
//! past them. Each partition also holds at most `retention` records; when a
//! slow group falls further behind than that, the oldest records are dropped
//! and the group resumes from the earliest one still held.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{BrokerError, Delivery, Publisher, Record, Subscription};

/// Shared handle to an in-memory broker; clones refer to the same log
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

struct Shared {
    partitions: usize,
    retention: usize,
    state: Mutex<LogState>,
    notify: Notify,
    closed: AtomicBool,
}

#[derive(Default)]
struct PartitionLog {
    /// Offset of the first record still held
    base: usize,
    records: VecDeque<Record>,
}

impl PartitionLog {
    fn get(&self, offset: usize) -> Option<&Record> {
        offset
            .checked_sub(self.base)
            .and_then(|index| self.records.get(index))
    }

    fn trim_to(&mut self, offset: usize) {
        while self.base < offset && self.records.pop_front().is_some() {
            self.base += 1;
        }
    }
}

#[derive(Default)]
struct LogState {
    /// topic -> partition -> records
    topics: HashMap<String, Vec<PartitionLog>>,
    /// (group, topic) -> next offset per partition
    offsets: HashMap<(String, String), Vec<usize>>,
    round_robin: usize,
}

impl LogState {
    fn topic_mut(&mut self, topic: &str, partitions: usize) -> &mut Vec<PartitionLog> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| (0..partitions).map(|_| PartitionLog::default()).collect())
    }

    /// Drop the records of `partition` that every group on `topic` has read
    fn release(&mut self, topic: &str, partition: usize) {
        let floor = self
            .offsets
            .iter()
            .filter(|((_, t), _)| t == topic)
            .map(|(_, next)| next[partition])
            .min();

        if let (Some(floor), Some(logs)) = (floor, self.topics.get_mut(topic)) {
            logs[partition].trim_to(floor);
        }
    }
}

impl MemoryBroker {
    /// Create a broker whose topics all have `partitions` partitions and
    /// no per-partition cap
    pub fn new(partitions: usize) -> Self {
        Self::with_retention(partitions, usize::MAX)
    }

    /// Create a broker that holds at most `retention` records per partition
    pub fn with_retention(partitions: usize, retention: usize) -> Self {
        MemoryBroker {
            shared: Arc::new(Shared {
                partitions: partitions.max(1),
                retention: retention.max(1),
                state: Mutex::new(LogState::default()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Join consumer group `group` on `topic`
    ///
    /// A group new to the topic starts at the earliest record still held,
    /// and records are kept for it from this point on.
    pub fn subscribe(&self, group: &str, topic: &str) -> MemorySubscription {
        {
            let mut state = self.shared.lock();
            let bases: Vec<usize> = state
                .topic_mut(topic, self.shared.partitions)
                .iter()
                .map(|log| log.base)
                .collect();
            state
                .offsets
                .entry((group.to_string(), topic.to_string()))
                .or_insert(bases);
        }

        MemorySubscription {
            shared: Arc::clone(&self.shared),
            group: group.to_string(),
            topic: topic.to_string(),
            cursor: 0,
        }
    }

    /// Close the broker. Pending and future reads fail with
    /// [`BrokerError::Closed`], as do publishes.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Partition a key routes to
    pub fn partition_for(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shared.partitions as u64) as usize
    }

    /// Snapshot of the records still held on `topic`, partition by partition
    pub fn messages(&self, topic: &str) -> Vec<Delivery> {
        let state = self.shared.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };

        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, log)| {
                log.records.iter().enumerate().map(move |(index, record)| {
                    to_delivery(topic, partition, log.base + index, record)
                })
            })
            .collect()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn to_delivery(topic: &str, partition: usize, offset: usize, record: &Record) -> Delivery {
    Delivery {
        topic: topic.to_string(),
        partition: partition as i32,
        offset: offset as i64,
        key: record.key.clone(),
        value: record.value.clone(),
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, topic: &str, records: Vec<Record>) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        {
            let mut state = self.shared.lock();
            let partitions = self.shared.partitions;
            for record in records {
                let partition = match &record.key {
                    Some(key) => self.partition_for(key),
                    None => {
                        state.round_robin = (state.round_robin + 1) % partitions;
                        state.round_robin
                    }
                };

                let log = &mut state.topic_mut(topic, partitions)[partition];
                log.records.push_back(record);
                if log.records.len() > self.shared.retention {
                    log.records.pop_front();
                    log.base += 1;
                }
            }
        }

        self.shared.notify.notify_waiters();
        Ok(())
    }
}

/// A consumer-group member reading one topic of a [`MemoryBroker`]
pub struct MemorySubscription {
    shared: Arc<Shared>,
    group: String,
    topic: String,
    cursor: usize,
}

impl MemorySubscription {
    /// Take the next unread record and commit its offset
    fn poll(&mut self) -> Option<Delivery> {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();

        let (partition, delivery) = self.take_next(&mut state)?;
        state.release(&self.topic, partition);
        Some(delivery)
    }

    /// Visit partitions round-robin so one busy partition cannot starve
    /// the others
    fn take_next(&mut self, state: &mut LogState) -> Option<(usize, Delivery)> {
        let LogState { topics, offsets, .. } = state;

        let partitions = topics.get(&self.topic)?;
        let count = partitions.len();
        let next = offsets
            .entry((self.group.clone(), self.topic.clone()))
            .or_insert_with(|| partitions.iter().map(|log| log.base).collect());

        for step in 0..count {
            let partition = (self.cursor + step) % count;
            let log = &partitions[partition];
            // records this group never read may have aged out
            let offset = next[partition].max(log.base);
            if let Some(record) = log.get(offset) {
                next[partition] = offset + 1;
                self.cursor = (partition + 1) % count;
                return Some((partition, to_delivery(&self.topic, partition, offset, record)));
            }
        }
        None
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_message(&mut self) -> Result<Delivery, BrokerError> {
        let shared = Arc::clone(&self.shared);
        loop {
            // Register interest before checking state so a publish between
            // the check and the await is not missed.
            let notified = shared.notify.notified();

            if shared.closed.load(Ordering::SeqCst) {
                return Err(BrokerError::Closed);
            }
            if let Some(delivery) = self.poll() {
                return Ok(delivery);
            }

            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(key: &str, value: &str) -> Record {
        Record::keyed(key, value.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_same_key_keeps_order_in_one_partition() {
        let broker = MemoryBroker::new(4);
        broker
            .publish("events", vec![record("t1", "a"), record("t1", "b"), record("t1", "c")])
            .await
            .unwrap();

        let stored = broker.messages("events");
        assert_eq!(stored.len(), 3);
        let expected = broker.partition_for(b"t1") as i32;
        assert!(stored.iter().all(|d| d.partition == expected));

        let mut sub = broker.subscribe("g", "events");
        for (want_offset, want_value) in [(0, "a"), (1, "b"), (2, "c")] {
            let delivery = sub.next_message().await.unwrap();
            assert_eq!(delivery.offset, want_offset);
            assert_eq!(delivery.value, want_value.as_bytes());
            assert_eq!(delivery.key.as_deref(), Some(&b"t1"[..]));
        }
    }

    #[tokio::test]
    async fn test_groups_track_offsets_independently() {
        let broker = MemoryBroker::new(2);
        broker.publish("events", vec![record("t1", "a")]).await.unwrap();

        let mut first = broker.subscribe("indexer", "events");
        let mut second = broker.subscribe("audit", "events");

        assert_eq!(first.next_message().await.unwrap().value, b"a");
        assert_eq!(second.next_message().await.unwrap().value, b"a");
    }

    #[tokio::test]
    async fn test_members_of_a_group_share_offsets() {
        let broker = MemoryBroker::new(1);
        broker
            .publish("events", vec![record("t1", "a"), record("t1", "b")])
            .await
            .unwrap();

        let mut one = broker.subscribe("g", "events");
        let mut two = broker.subscribe("g", "events");

        assert_eq!(one.next_message().await.unwrap().value, b"a");
        assert_eq!(two.next_message().await.unwrap().value, b"b");
    }

    #[tokio::test]
    async fn test_reader_wakes_on_publish() {
        let broker = MemoryBroker::new(2);
        let mut sub = broker.subscribe("g", "alerts");

        let reader = tokio::spawn(async move { sub.next_message().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publish("alerts", vec![record("t1", "x")]).await.unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader should wake")
            .unwrap()
            .unwrap();
        assert_eq!(delivery.value, b"x");
    }

    #[tokio::test]
    async fn test_close_fails_pending_reads_and_publishes() {
        let broker = MemoryBroker::new(1);
        let mut sub = broker.subscribe("g", "alerts");

        let reader = tokio::spawn(async move { sub.next_message().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.close();

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader should wake")
            .unwrap();
        assert!(matches!(result, Err(BrokerError::Closed)));

        let publish = broker.publish("alerts", vec![record("t1", "x")]).await;
        assert!(matches!(publish, Err(BrokerError::Closed)));
    }

    #[tokio::test]
    async fn test_consumed_records_are_released() {
        let broker = MemoryBroker::new(2);
        let mut sub = broker.subscribe("indexer", "events");

        for i in 0..1000 {
            broker
                .publish("events", vec![record("t1", &i.to_string())])
                .await
                .unwrap();
            let delivery = sub.next_message().await.unwrap();
            assert_eq!(delivery.offset, i);
        }

        assert!(broker.messages("events").is_empty());
    }

    #[tokio::test]
    async fn test_records_wait_for_the_slowest_group() {
        let broker = MemoryBroker::new(1);
        let mut fast = broker.subscribe("indexer", "events");
        let mut slow = broker.subscribe("audit", "events");
        broker
            .publish("events", vec![record("t1", "a"), record("t1", "b")])
            .await
            .unwrap();

        fast.next_message().await.unwrap();
        fast.next_message().await.unwrap();
        assert_eq!(broker.messages("events").len(), 2);

        assert_eq!(slow.next_message().await.unwrap().value, b"a");
        let held = broker.messages("events");
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].offset, 1);
    }

    #[tokio::test]
    async fn test_retention_cap_drops_oldest_records() {
        let broker = MemoryBroker::with_retention(1, 3);
        let mut sub = broker.subscribe("g", "alerts");
        let records = (0..5).map(|i| record("t1", &i.to_string())).collect();
        broker.publish("alerts", records).await.unwrap();

        let offsets: Vec<i64> = broker.messages("alerts").iter().map(|d| d.offset).collect();
        assert_eq!(offsets, vec![2, 3, 4]);

        // the lagging group resumes from the earliest record still held
        let delivery = sub.next_message().await.unwrap();
        assert_eq!(delivery.offset, 2);
        assert_eq!(delivery.value, b"2");
    }

    #[tokio::test]
    async fn test_unkeyed_records_spread_across_partitions() {
        let broker = MemoryBroker::new(3);
        let records = (0..6)
            .map(|i| Record {
                key: None,
                value: vec![i],
            })
            .collect();
        broker.publish("alerts", records).await.unwrap();

        let stored = broker.messages("alerts");
        for partition in 0..3 {
            assert_eq!(stored.iter().filter(|d| d.partition == partition).count(), 2);
        }
    }
}
