use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Configuration for the pipeline daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Message broker configuration
    pub broker: BrokerConfig,
    /// Relational store configuration
    pub store: StoreConfig,
    /// Search index configuration
    pub index: IndexConfig,
    /// HTTP ingress configuration
    pub ingress: IngressConfig,
    /// Delivery-semantics configuration
    pub pipeline: PipelineConfig,
}

/// Which broker backend to connect to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// In-process log; ingress and workers must share the process
    Memory,
    /// Kafka-compatible cluster (requires the `kafka` feature)
    Kafka,
}

/// Message broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub kind: BrokerKind,
    /// Bootstrap broker addresses
    pub brokers: Vec<String>,
    pub events_topic: String,
    pub alerts_topic: String,
    /// Consumer group of the event indexer
    pub events_consumer_group: String,
    /// Consumer group of the alert writer
    pub alerts_consumer_group: String,
    /// Partitions per topic for the in-memory broker
    pub partitions: usize,
    /// Records the in-memory broker keeps per partition before dropping the
    /// oldest, whether or not every group has read them
    pub memory_retention: usize,
}

/// Relational store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database
    pub path: PathBuf,
    /// Upper bound on a single write, in seconds
    pub write_timeout_secs: u64,
}

/// Search index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Base URL of the OpenSearch-compatible index
    pub url: String,
    /// Collection that receives event documents
    pub collection: String,
    /// Upper bound on a single write, in seconds
    pub timeout_secs: u64,
}

/// HTTP ingress configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    pub listen_address: String,
}

/// Delivery behavior of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Reproduce the reference behavior exactly: best-effort publish,
    /// fatal alert-reader errors, log-and-drop on sink failures
    Legacy,
    /// Acknowledged publish, uniform retry on read errors, dead-lettering
    Hardened,
}

impl FromStr for PipelineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "legacy" => Ok(PipelineMode::Legacy),
            "hardened" => Ok(PipelineMode::Hardened),
            _ => Err(s.to_string()),
        }
    }
}

impl FromStr for BrokerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(BrokerKind::Memory),
            "kafka" => Ok(BrokerKind::Kafka),
            _ => Err(s.to_string()),
        }
    }
}

/// Delivery-semantics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
    /// Sleep after a broker read error, in milliseconds
    pub read_backoff_ms: u64,
    /// Topic receiving failed messages (hardened mode only)
    pub dead_letter_topic: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            kind: BrokerKind::Memory,
            brokers: vec!["localhost:9092".to_string()],
            events_topic: "events".to_string(),
            alerts_topic: "alerts".to_string(),
            events_consumer_group: "siem-events-indexer".to_string(),
            alerts_consumer_group: "siem-alerts-writer".to_string(),
            partitions: 4,
            memory_retention: 100_000,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: PathBuf::from("siem.db"),
            write_timeout_secs: 10,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            url: "http://localhost:9200".to_string(),
            collection: "events".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for IngressConfig {
    fn default() -> Self {
        IngressConfig {
            listen_address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            mode: PipelineMode::Legacy,
            read_backoff_ms: 2000,
            dead_letter_topic: None,
        }
    }
}

impl StoreConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl IndexConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PipelineConfig {
    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms)
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    ///
    /// Empty values are treated as unset.
    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(brokers) = var("KAFKA_BROKERS") {
            self.broker.brokers = brokers
                .split(',')
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty())
                .collect();
        }
        if let Some(topic) = var("EVENTS_TOPIC") {
            self.broker.events_topic = topic;
        }
        if let Some(topic) = var("ALERTS_TOPIC") {
            self.broker.alerts_topic = topic;
        }
        if let Some(group) = var("EVENTS_CONSUMER_GROUP") {
            self.broker.events_consumer_group = group;
        }
        if let Some(group) = var("ALERTS_CONSUMER_GROUP") {
            self.broker.alerts_consumer_group = group;
        }
        if let Some(kind) = var("BROKER_KIND") {
            self.broker.kind = kind.parse().map_err(|value| ConfigError::InvalidValue {
                key: "BROKER_KIND",
                value,
            })?;
        }
        if let Some(path) = var("ALERTS_DB_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(url) = var("OPENSEARCH_URL") {
            self.index.url = url;
        }
        if let Some(addr) = var("INGRESS_ADDR") {
            self.ingress.listen_address = addr;
        }
        if let Some(mode) = var("PIPELINE_MODE") {
            self.pipeline.mode = mode.parse().map_err(|value| ConfigError::InvalidValue {
                key: "PIPELINE_MODE",
                value,
            })?;
        }
        if let Some(topic) = var("DEAD_LETTER_TOPIC") {
            self.pipeline.dead_letter_topic = Some(topic);
        }

        self.index.url = self.index.url.trim_end_matches('/').to_string();
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_local_development() {
        let config = Config::default();
        assert_eq!(config.broker.brokers, vec!["localhost:9092"]);
        assert_eq!(config.broker.events_topic, "events");
        assert_eq!(config.broker.alerts_topic, "alerts");
        assert_eq!(config.broker.events_consumer_group, "siem-events-indexer");
        assert_eq!(config.broker.alerts_consumer_group, "siem-alerts-writer");
        assert_eq!(config.index.url, "http://localhost:9200");
        assert_eq!(config.index.timeout(), Duration::from_secs(10));
        assert_eq!(config.store.write_timeout(), Duration::from_secs(10));
        assert_eq!(config.pipeline.mode, PipelineMode::Legacy);
        assert_eq!(config.pipeline.read_backoff(), Duration::from_secs(2));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default()
            .apply_env_with(lookup(&[
                ("KAFKA_BROKERS", "k1:9092, k2:9092"),
                ("EVENTS_TOPIC", "raw-events"),
                ("ALERTS_CONSUMER_GROUP", "writers"),
                ("OPENSEARCH_URL", "http://search:9200/"),
                ("PIPELINE_MODE", "Hardened"),
                ("DEAD_LETTER_TOPIC", "dlq"),
                ("ALERTS_TOPIC", ""),
            ]))
            .unwrap();

        assert_eq!(config.broker.brokers, vec!["k1:9092", "k2:9092"]);
        assert_eq!(config.broker.events_topic, "raw-events");
        assert_eq!(config.broker.alerts_topic, "alerts");
        assert_eq!(config.broker.alerts_consumer_group, "writers");
        assert_eq!(config.index.url, "http://search:9200");
        assert_eq!(config.pipeline.mode, PipelineMode::Hardened);
        assert_eq!(config.pipeline.dead_letter_topic.as_deref(), Some("dlq"));
    }

    #[test]
    fn test_invalid_mode_is_rejected() {
        let result = Config::default().apply_env_with(lookup(&[("PIPELINE_MODE", "fast")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { key: "PIPELINE_MODE", .. })
        ));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[pipeline]\nmode = \"hardened\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.pipeline.mode, PipelineMode::Hardened);
        assert_eq!(config.pipeline.read_backoff_ms, 2000);
        assert_eq!(config.broker.alerts_topic, "alerts");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.pipeline.dead_letter_topic = Some("dlq".to_string());
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.pipeline.dead_letter_topic.as_deref(), Some("dlq"));
        assert_eq!(loaded.broker.kind, BrokerKind::Memory);
    }
}
