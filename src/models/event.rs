use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Default value for the `source` field when the agent did not supply one
pub const DEFAULT_SOURCE: &str = "agent";

/// A single raw telemetry record
///
/// Apart from the enrichment fields, the content is opaque to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    fields: Map<String, Value>,
}

impl RawEvent {
    /// Wrap a JSON value, which must be an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(RawEvent { fields }),
            _ => None,
        }
    }

    /// Stamp tenant and timing metadata onto the event
    ///
    /// `tenant_id` and `ingested_at` are always overwritten; `source` is only
    /// set when the key is absent.
    pub fn enrich(&mut self, tenant_id: &str, ingested_at: DateTime<Utc>) {
        self.fields
            .insert("tenant_id".to_string(), Value::String(tenant_id.to_string()));
        self.fields.insert(
            "ingested_at".to_string(),
            Value::String(ingested_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        self.fields
            .entry("source")
            .or_insert_with(|| Value::String(DEFAULT_SOURCE.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.fields)
    }
}
