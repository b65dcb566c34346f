use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::coercion::coerce;

pub const DEFAULT_TENANT: &str = "default";
pub const DEFAULT_SEVERITY: &str = "medium";
pub const DEFAULT_TITLE: &str = "Detection Alert";

/// Case-management status of an alert row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Assigned,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Assigned => "assigned",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(AlertStatus::Open),
            "assigned" => Ok(AlertStatus::Assigned),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(format!("unknown alert status: {}", other)),
        }
    }
}

/// An alert extracted from an alerts-topic message
///
/// All defaulting happens in [`AlertRecord::from_payload`]. Status is not
/// part of the record: the writer always persists `open`.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    pub id: String,
    pub tenant_id: String,
    pub rule_id: Option<String>,
    pub severity: String,
    pub title: String,
    pub description: String,
    /// Original payload text, stored verbatim
    pub event_data: String,
}

impl AlertRecord {
    /// Parse a raw message payload into an alert record
    ///
    /// The payload must be a JSON object. A missing or unusable `id` is
    /// replaced by `alert-<unix nanos>`, which is unique but not stable
    /// across redeliveries.
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let fields: Map<String, Value> = serde_json::from_slice(payload)?;
        let event_data = String::from_utf8_lossy(payload).into_owned();
        Ok(Self::from_fields(&fields, event_data))
    }

    fn from_fields(fields: &Map<String, Value>, event_data: String) -> Self {
        let rule_id = coerce(fields.get("rule_id"), "");

        AlertRecord {
            id: coerce(fields.get("id"), &generated_id()),
            tenant_id: coerce(fields.get("tenant_id"), DEFAULT_TENANT),
            rule_id: if rule_id.is_empty() { None } else { Some(rule_id) },
            severity: coerce(fields.get("severity"), DEFAULT_SEVERITY),
            title: coerce(fields.get("rule_name"), DEFAULT_TITLE),
            description: coerce(fields.get("description"), ""),
            event_data,
        }
    }
}

fn generated_id() -> String {
    let now = Utc::now();
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000));
    format!("alert-{}", nanos)
}
