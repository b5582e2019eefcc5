//! Durable time-series append of every measurement.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Sink;
use crate::error::SinkError;
use crate::models::{Measurement, Record};

// ---

/// Append-only time-series backend.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    async fn write_point(
        &self,
        measurement: &str,
        tags: &BTreeMap<String, String>,
        fields: &Record,
        timestamp: DateTime<Utc>,
    ) -> Result<(), SinkError>;
}

/// Writes one point per request, tagged with the node identity.
pub struct MetricsSink {
    store: Arc<dyn TimeSeriesStore>,
    measurement_name: String,
}

impl MetricsSink {
    pub fn new(store: Arc<dyn TimeSeriesStore>, measurement_name: impl Into<String>) -> Self {
        Self {
            store,
            measurement_name: measurement_name.into(),
        }
    }
}

#[async_trait]
impl Sink for MetricsSink {
    // ---
    fn name(&self) -> &'static str {
        "influxdb"
    }

    fn records_history(&self) -> bool {
        true
    }

    async fn deliver(&self, m: &Measurement) -> Result<(), SinkError> {
        // ---
        let tags = BTreeMap::from([("node".to_string(), m.node.to_string())]);

        tracing::debug!(
            measurement = %self.measurement_name,
            node = %m.node,
            fields = m.fields.len(),
            "writing point"
        );

        self.store
            .write_point(&self.measurement_name, &tags, &m.fields, m.received_at)
            .await
    }
}
