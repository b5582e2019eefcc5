//! Pub/sub sink with dynamic sensor registration.
//!
//! For each node the sink publishes, all retained:
//! - one discovery config per field, `<root>/sensor/<node>/<field>/config`,
//!   at most once per (node, field) for the lifetime of the sink
//! - presence, `<root>/sensor/<node>/status` = `online`
//! - the full record as JSON, `<root>/sensor/<node>/state`
//!
//! The layout is the one Home Assistant's MQTT discovery consumes.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use serde_json::{json, Map, Value};

use super::Sink;
use crate::error::SinkError;
use crate::models::{Measurement, NodeIdentity};

// ---

/// Pub/sub backend.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), SinkError>;
}

/// Which (node, field) channels already had their config published.
///
/// Losing an entry only costs a repeated, idempotent publish.
#[derive(Debug, Default)]
pub struct DiscoveryCache {
    published: DashSet<(NodeIdentity, String)>,
}

impl DiscoveryCache {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically mark the channel; true when the caller should publish.
    pub fn claim(&self, node: &NodeIdentity, field: &str) -> bool {
        self.published.insert((node.clone(), field.to_string()))
    }

    /// Undo a claim whose publish failed.
    pub fn release(&self, node: &NodeIdentity, field: &str) {
        self.published.remove(&(node.clone(), field.to_string()));
    }

    /// Claim the channel and hold it until [`Claim::commit`].
    ///
    /// Dropping the guard uncommitted releases the claim, so a publish that
    /// fails or is cancelled mid-flight leaves the channel unregistered.
    pub fn try_claim<'a>(&'a self, node: &'a NodeIdentity, field: &'a str) -> Option<Claim<'a>> {
        self.claim(node, field).then(|| Claim {
            cache: self,
            node,
            field,
            committed: false,
        })
    }

    pub fn contains(&self, node: &NodeIdentity, field: &str) -> bool {
        self.published.contains(&(node.clone(), field.to_string()))
    }

    pub fn len(&self) -> usize {
        self.published.len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.is_empty()
    }
}

/// Pending registration of one channel.
#[must_use]
pub struct Claim<'a> {
    cache: &'a DiscoveryCache,
    node: &'a NodeIdentity,
    field: &'a str,
    committed: bool,
}

impl Claim<'_> {
    /// The config reached the broker; keep the channel marked.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.cache.release(self.node, self.field);
        }
    }
}

// ---

/// Discovery metadata for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMetadata {
    pub device_class: Option<&'static str>,
    pub unit: Option<&'static str>,
    pub icon: Option<&'static str>,
    pub state_class: Option<&'static str>,
    pub enabled_by_default: bool,
}

impl FieldMetadata {
    const fn measured(device_class: &'static str, unit: Option<&'static str>) -> Self {
        Self {
            device_class: Some(device_class),
            unit,
            icon: None,
            state_class: Some("measurement"),
            enabled_by_default: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FieldMatch {
    Exact(&'static str),
    Suffix(&'static str),
}

impl FieldMatch {
    fn matches(self, field: &str) -> bool {
        match self {
            FieldMatch::Exact(name) => field == name,
            FieldMatch::Suffix(suffix) => field.ends_with(suffix),
        }
    }
}

const MICROGRAMS: Option<&str> = Some("µg/m³");

/// Checked top to bottom; the first match wins.
const FIELD_TABLE: [(FieldMatch, FieldMetadata); 9] = [
    (
        FieldMatch::Exact("AQI_value"),
        FieldMetadata::measured("aqi", None),
    ),
    (
        FieldMatch::Exact("AQI_category"),
        FieldMetadata {
            device_class: None,
            unit: None,
            icon: Some("mdi:air-filter"),
            state_class: None,
            enabled_by_default: true,
        },
    ),
    (FieldMatch::Suffix("P0"), FieldMetadata::measured("pm1", MICROGRAMS)),
    (FieldMatch::Suffix("P1"), FieldMetadata::measured("pm10", MICROGRAMS)),
    (FieldMatch::Suffix("P2"), FieldMetadata::measured("pm25", MICROGRAMS)),
    (
        FieldMatch::Suffix("temperature"),
        FieldMetadata::measured("temperature", Some("°C")),
    ),
    (
        FieldMatch::Suffix("humidity"),
        FieldMetadata::measured("humidity", Some("%")),
    ),
    (
        FieldMatch::Suffix("pressure"),
        FieldMetadata::measured("pressure", Some("Pa")),
    ),
    (
        FieldMatch::Suffix("lux"),
        FieldMetadata::measured("illuminance", Some("lx")),
    ),
];

const FALLBACK: FieldMetadata = FieldMetadata {
    device_class: None,
    unit: None,
    icon: None,
    state_class: None,
    enabled_by_default: false,
};

/// Metadata for any field name. Unknown fields get a disabled-by-default entry.
pub fn classify_field(field: &str) -> FieldMetadata {
    FIELD_TABLE
        .iter()
        .find(|(matcher, _)| matcher.matches(field))
        .map(|(_, meta)| *meta)
        .unwrap_or(FALLBACK)
}

// ---

pub struct DiscoverySink {
    publisher: Arc<dyn Publisher>,
    cache: Arc<DiscoveryCache>,
    root: String,
}

impl DiscoverySink {
    // ---
    pub fn new(publisher: Arc<dyn Publisher>, cache: Arc<DiscoveryCache>, root: impl Into<String>) -> Self {
        Self {
            publisher,
            cache,
            root: root.into().trim_end_matches('/').to_string(),
        }
    }

    fn node_topic(&self, node: &NodeIdentity, leaf: &str) -> String {
        format!("{}/sensor/{}/{}", self.root, topic_segment(node.as_str()), leaf)
    }

    fn config_topic(&self, node: &NodeIdentity, field: &str) -> String {
        self.node_topic(node, &format!("{}/config", topic_segment(field)))
    }

    fn config_payload(&self, m: &Measurement, field: &str) -> Value {
        // ---
        let meta = classify_field(field);
        let node = m.node.as_str();

        let mut device = Map::new();
        device.insert("identifiers".into(), json!([node]));
        device.insert("name".into(), json!(node));
        device.insert("model".into(), json!("Particulate matter sensor"));
        if let Some(version) = &m.software_version {
            device.insert("sw_version".into(), json!(version));
        }

        let mut payload = Map::new();
        payload.insert("name".into(), json!(field));
        payload.insert("unique_id".into(), json!(format!("{node}_{field}")));
        payload.insert("state_topic".into(), json!(self.node_topic(&m.node, "state")));
        payload.insert(
            "availability_topic".into(),
            json!(self.node_topic(&m.node, "status")),
        );
        payload.insert(
            "value_template".into(),
            json!(format!("{{{{ value_json['{field}'] }}}}")),
        );
        payload.insert("enabled_by_default".into(), json!(meta.enabled_by_default));
        if let Some(class) = meta.device_class {
            payload.insert("device_class".into(), json!(class));
        }
        if let Some(unit) = meta.unit {
            payload.insert("unit_of_measurement".into(), json!(unit));
        }
        if let Some(icon) = meta.icon {
            payload.insert("icon".into(), json!(icon));
        }
        if let Some(state_class) = meta.state_class {
            payload.insert("state_class".into(), json!(state_class));
        }
        payload.insert("device".into(), Value::Object(device));

        Value::Object(payload)
    }
}

#[async_trait]
impl Sink for DiscoverySink {
    // ---
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn deliver(&self, m: &Measurement) -> Result<(), SinkError> {
        // ---
        for field in m.fields.keys() {
            let Some(claim) = self.cache.try_claim(&m.node, field) else {
                continue;
            };

            let topic = self.config_topic(&m.node, field);
            let payload = serde_json::to_string(&self.config_payload(m, field))?;

            self.publisher.publish(&topic, payload, true).await?;
            claim.commit();
            tracing::info!(node = %m.node, field = %field, "registered sensor channel");
        }

        self.publisher
            .publish(&self.node_topic(&m.node, "status"), "online".to_string(), true)
            .await?;

        let state = serde_json::to_string(&m.fields)?;
        self.publisher
            .publish(&self.node_topic(&m.node, "state"), state, true)
            .await
    }
}

/// MQTT wildcards and separators are not allowed inside a topic level.
fn topic_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '/' | '+' | '#' | ' ' => '_',
            c => c,
        })
        .collect()
}
