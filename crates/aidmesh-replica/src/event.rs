//! The event model: what an edge node ingests.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Longest accepted `location` string.
pub const MAX_LOCATION_LEN: usize = 128;
/// Longest accepted string `value`.
pub const MAX_VALUE_LEN: usize = 512;
/// Serialized `metadata` cap.
pub const MAX_METADATA_BYTES: usize = 64 * 1024;

/// Domain category of an event. Decides which CRDT carries the payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Water level, wind speed, temperature: latest reading wins.
    Sensor,
    /// Shelter occupancy, supplies: net quantity that moves both ways.
    Resource,
    /// Blocked roads, outages: status registered per location.
    Infrastructure,
    /// Anything uncategorized.
    #[default]
    General,
}

/// Direction of a resource adjustment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOperation {
    #[default]
    Increment,
    Decrement,
}

/// An immutable telemetry record, id and timestamp assigned by the node
/// that received it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub node_origin: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub value: CanonicalValue,
    pub location: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub timestamp: u64,
    #[serde(default)]
    pub category: EventCategory,
    #[serde(default)]
    pub operation: EventOperation,
}

/// What a client submits to `POST /event`; the node fills in the rest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventDraft {
    #[serde(rename = "type")]
    pub event_type: String,
    pub value: Value,
    pub location: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub category: EventCategory,
    #[serde(default)]
    pub operation: EventOperation,
}

impl EventDraft {
    /// Intake validation. Rejects anything a replica should never carry.
    pub fn validate(&self) -> Result<(), String> {
        if self.event_type.trim().is_empty() {
            return Err("type must be non-empty".into());
        }
        match &self.value {
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
            Value::String(s) if s.len() <= MAX_VALUE_LEN => {}
            Value::String(_) => {
                return Err(format!("string value exceeds {MAX_VALUE_LEN} chars"));
            }
            _ => return Err("value must be a JSON scalar or short string".into()),
        }
        if self.location.len() > MAX_LOCATION_LEN {
            return Err(format!("location exceeds {MAX_LOCATION_LEN} chars"));
        }
        let metadata_bytes = serde_json::to_vec(&self.metadata)
            .map(|v| v.len())
            .unwrap_or(usize::MAX);
        if metadata_bytes > MAX_METADATA_BYTES {
            return Err(format!("metadata exceeds {MAX_METADATA_BYTES} bytes serialized"));
        }
        Ok(())
    }

    /// Stamp the draft into a full event owned by `node_id`.
    pub fn into_event(self, node_id: &str, timestamp: u64) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            node_origin: node_id.to_string(),
            event_type: self.event_type,
            value: CanonicalValue(self.value),
            location: self.location,
            metadata: self.metadata,
            timestamp,
            category: self.category,
            operation: self.operation,
        }
    }
}

/// A JSON value ordered by its canonical text.
///
/// Registers need a totally ordered payload so that a full stamp tie still
/// joins deterministically; raw `serde_json::Value` carries no order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalValue(pub Value);

impl CanonicalValue {
    /// Compact canonical rendering (map keys sorted).
    pub fn canonical(&self) -> String {
        self.0.to_string()
    }

    /// Numeric view, when the value is a number.
    pub fn as_i64(&self) -> Option<i64> {
        self.0.as_i64().or_else(|| self.0.as_f64().map(|f| f as i64))
    }
}

impl From<Value> for CanonicalValue {
    fn from(v: Value) -> Self {
        CanonicalValue(v)
    }
}

impl PartialEq for CanonicalValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CanonicalValue {}

impl PartialOrd for CanonicalValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CanonicalValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical().cmp(&other.canonical())
    }
}
