//! Data models shared by the ingestion pipeline and its sinks.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::aqi::AqiCategory;

// ---

/// Measurement report as posted by the sensor firmware.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReport {
    // ---
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub esp8266id: Option<String>,

    #[serde(default, alias = "rpiid", deserialize_with = "opt_string_or_number")]
    pub raspiid: Option<String>,

    #[serde(default)]
    pub software_version: Option<String>,

    #[serde(default)]
    pub sensordatavalues: Vec<SensorDataValue>,
}

/// One `{value_type, value}` pair; the value stays string-encoded until normalized.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorDataValue {
    // ---
    pub value_type: String,

    #[serde(deserialize_with = "string_or_number")]
    pub value: String,
}

impl SensorDataValue {
    pub fn new(value_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            value_type: value_type.into(),
            value: value.into(),
        }
    }
}

/// Firmware sends ids and values both quoted and bare.
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Text(String),
    Number(serde_json::Number),
}

impl From<StringOrNumber> for String {
    fn from(v: StringOrNumber) -> Self {
        match v {
            StringOrNumber::Text(s) => s,
            StringOrNumber::Number(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrNumber::deserialize(deserializer).map(String::from)
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<StringOrNumber>::deserialize(deserializer)?.map(String::from))
}

// ---

/// Value of a record field. Sensor readings are numbers; `AQI_category` is text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<AqiCategory> for FieldValue {
    fn from(c: AqiCategory) -> Self {
        FieldValue::Text(c.label().to_string())
    }
}

/// Field name -> value, keyed verbatim by `value_type`.
pub type Record = BTreeMap<String, FieldValue>;

/// Partition key for every sink, `{family}-{id}` or `unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeIdentity(String);

impl NodeIdentity {
    // ---
    pub fn new(family: &str, id: &str) -> Self {
        Self(format!("{family}-{id}"))
    }

    pub fn unknown() -> Self {
        Self("unknown".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unit handed to every sink for one accepted report.
#[derive(Debug, Clone)]
pub struct Measurement {
    // ---
    pub request_id: Uuid,
    pub node: NodeIdentity,
    pub software_version: Option<String>,
    pub received_at: DateTime<Utc>,
    pub fields: Record,
}

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkStatus {
    Ok,
    Unavailable,
}

/// Outcome of one sink for one request.
#[derive(Debug, Clone, Serialize)]
pub struct SinkOutcome {
    // ---
    pub sink: &'static str,
    pub status: SinkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SinkOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == SinkStatus::Ok
    }
}

/// AQI attached to an accepted report.
#[derive(Debug, Clone, Serialize)]
pub struct AqiSummary {
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<AqiCategory>,
}

/// Result returned to the transport for an accepted report.
///
/// Partial success (some sinks unavailable) is still `success: true`.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    // ---
    pub success: bool,
    pub request_id: Uuid,
    pub node: NodeIdentity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aqi: Option<AqiSummary>,
    pub sinks: Vec<SinkOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<AqiCategory>,
}

impl IngestResult {
    pub fn sink(&self, name: &str) -> Option<&SinkOutcome> {
        self.sinks.iter().find(|o| o.sink == name)
    }
}
