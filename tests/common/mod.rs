//! In-memory stand-ins for the external backends.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use feinstaub_bridge::alert::{AlertEngine, AlertLedger, Notifier};
use feinstaub_bridge::aqi::AqiCategory;
use feinstaub_bridge::models::{FieldValue, Measurement, Record, SensorDataValue};
use feinstaub_bridge::sinks::{
    DiscoveryCache, DiscoverySink, MetricsSink, Publisher, Sink, TimeSeriesStore,
};
use feinstaub_bridge::{AlertError, Pipeline, RawReport, SinkError};

// ---

/// Time-series store and alert ledger backed by a vector, like a tiny InfluxDB.
#[derive(Default)]
pub struct MemoryInflux {
    pub points: Mutex<Vec<(String, BTreeMap<String, String>, Record)>>,
    pub announcements: Mutex<Vec<AqiCategory>>,
    pub fail_writes: bool,
}

impl MemoryInflux {
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Default::default()
        }
    }

    pub fn point_count(&self) -> usize {
        self.points.lock().unwrap().len()
    }

    pub fn last_fields(&self) -> Option<Record> {
        self.points.lock().unwrap().last().map(|(_, _, f)| f.clone())
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryInflux {
    async fn write_point(
        &self,
        measurement: &str,
        tags: &BTreeMap<String, String>,
        fields: &Record,
        _timestamp: DateTime<Utc>,
    ) -> Result<(), SinkError> {
        if self.fail_writes {
            return Err(SinkError::Rejected {
                status: 503,
                body: "influx unavailable".into(),
            });
        }
        self.points
            .lock()
            .unwrap()
            .push((measurement.to_string(), tags.clone(), fields.clone()));
        Ok(())
    }
}

#[async_trait]
impl AlertLedger for MemoryInflux {
    async fn recent_categories(&self, _window: Duration) -> Result<Vec<AqiCategory>, AlertError> {
        let points = self.points.lock().unwrap();
        Ok(points
            .iter()
            .filter_map(|(_, _, fields)| match fields.get("AQI_category") {
                Some(FieldValue::Text(label)) => label.parse().ok(),
                _ => None,
            })
            .collect())
    }

    async fn last_announced(&self) -> Result<Option<AqiCategory>, AlertError> {
        Ok(self.announcements.lock().unwrap().last().copied())
    }

    async fn record_announcement(&self, category: AqiCategory) -> Result<(), AlertError> {
        self.announcements.lock().unwrap().push(category);
        Ok(())
    }
}

/// Pub/sub broker that records every publish.
#[derive(Default)]
pub struct MemoryBroker {
    pub messages: Mutex<Vec<(String, String, bool)>>,
    pub down: bool,
}

impl MemoryBroker {
    pub fn down() -> Self {
        Self {
            down: true,
            ..Default::default()
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _, _)| t.clone())
            .collect()
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), SinkError> {
        if self.down {
            return Err(SinkError::Rejected {
                status: 0,
                body: "connection refused".into(),
            });
        }
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), payload, retain));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, _recipients: &[String], text: &str) -> Result<(), AlertError> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Sink that never finishes within any reasonable timeout.
pub struct StuckSink;

#[async_trait]
impl Sink for StuckSink {
    fn name(&self) -> &'static str {
        "stuck"
    }

    async fn deliver(&self, _m: &Measurement) -> Result<(), SinkError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

// ---

pub struct Harness {
    pub influx: Arc<MemoryInflux>,
    pub broker: Arc<MemoryBroker>,
    pub notifier: Arc<RecordingNotifier>,
    pub pipeline: Pipeline,
}

/// Pipeline with both sinks and alerting wired to in-memory backends.
pub fn harness(influx: MemoryInflux, broker: MemoryBroker) -> Harness {
    let influx = Arc::new(influx);
    let broker = Arc::new(broker);
    let notifier = Arc::new(RecordingNotifier::default());

    let sinks: Vec<Arc<dyn Sink>> = vec![
        Arc::new(MetricsSink::new(influx.clone(), "feinstaub")),
        Arc::new(DiscoverySink::new(
            broker.clone(),
            Arc::new(DiscoveryCache::new()),
            "homeassistant",
        )),
    ];
    let alerts = AlertEngine::new(
        influx.clone(),
        notifier.clone(),
        vec!["HIJKLMN".into()],
        Duration::from_secs(15 * 60),
    );

    Harness {
        pipeline: Pipeline::new(sinks, Some(alerts), Duration::from_millis(500)),
        influx,
        broker,
        notifier,
    }
}

pub fn report(esp_id: &str, values: &[(&str, &str)]) -> RawReport {
    RawReport {
        esp8266id: Some(esp_id.to_string()),
        software_version: Some("NRZ-2020-133".into()),
        sensordatavalues: values
            .iter()
            .map(|(k, v)| SensorDataValue::new(*k, *v))
            .collect(),
        ..Default::default()
    }
}
