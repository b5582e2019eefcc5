//! Per-report orchestration: normalize, enrich, fan out, evaluate alerts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::Instrument;
use uuid::Uuid;

use crate::alert::AlertEngine;
use crate::aqi::{self, AqiReading};
use crate::error::{IngestError, SinkError};
use crate::models::{
    AqiSummary, IngestResult, Measurement, NodeIdentity, RawReport, Record, SinkOutcome,
    SinkStatus,
};
use crate::normalize::{node_identity, normalize};
use crate::sinks::Sink;

// ---

/// Ingestion pipeline over the sinks registered at startup.
pub struct Pipeline {
    sinks: Vec<Arc<dyn Sink>>,
    alerts: Option<AlertEngine>,
    sink_timeout: Duration,
}

impl Pipeline {
    // ---
    pub fn new(sinks: Vec<Arc<dyn Sink>>, alerts: Option<AlertEngine>, sink_timeout: Duration) -> Self {
        Self {
            sinks,
            alerts,
            sink_timeout,
        }
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Process one report end to end.
    ///
    /// Only a malformed value fails the request; unavailable sinks and alert
    /// problems are logged and reflected in the result.
    pub async fn ingest(&self, report: &RawReport) -> Result<IngestResult, IngestError> {
        // ---
        let request_id = Uuid::new_v4();
        let node = node_identity(report);
        let span = tracing::info_span!("ingest", %request_id, %node);

        self.run(report, request_id, node).instrument(span).await
    }

    async fn run(
        &self,
        report: &RawReport,
        request_id: Uuid,
        node: NodeIdentity,
    ) -> Result<IngestResult, IngestError> {
        // ---
        let mut fields = normalize(&report.sensordatavalues).inspect_err(|e| {
            tracing::warn!("Rejecting report: {}", e);
        })?;
        tracing::debug!("Received data: {:?}", fields);

        let reading = aqi::compute_aqi(&fields);
        match &reading {
            Some(r) => enrich(&mut fields, r),
            None => tracing::debug!("incomplete pollutant data, AQI omitted"),
        }

        let measurement = Measurement {
            request_id,
            node: node.clone(),
            software_version: report.software_version.clone(),
            received_at: Utc::now(),
            fields,
        };

        let outcomes = self.fan_out(&measurement).await;

        let alert = match reading.and_then(|r| r.category) {
            Some(category) if self.history_recorded(&outcomes) => {
                self.evaluate_alerts(category).await
            }
            _ => None,
        };

        Ok(IngestResult {
            success: true,
            request_id,
            node,
            aqi: reading.map(|r| AqiSummary {
                value: r.value,
                category: r.category,
            }),
            sinks: outcomes,
            alert,
        })
    }

    /// Deliver to every sink concurrently, each bounded by the sink timeout.
    async fn fan_out(&self, m: &Measurement) -> Vec<SinkOutcome> {
        // ---
        let calls = self.sinks.iter().map(|sink| async move {
            let result = match tokio::time::timeout(self.sink_timeout, sink.deliver(m)).await {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout(self.sink_timeout)),
            };

            match result {
                Ok(()) => SinkOutcome {
                    sink: sink.name(),
                    status: SinkStatus::Ok,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!("Sink '{}' unavailable: {}", sink.name(), e);
                    SinkOutcome {
                        sink: sink.name(),
                        status: SinkStatus::Unavailable,
                        error: Some(e.to_string()),
                    }
                }
            }
        });

        join_all(calls).await
    }

    fn history_recorded(&self, outcomes: &[SinkOutcome]) -> bool {
        self.sinks
            .iter()
            .zip(outcomes)
            .any(|(sink, outcome)| sink.records_history() && outcome.is_ok())
    }

    async fn evaluate_alerts(&self, category: aqi::AqiCategory) -> Option<aqi::AqiCategory> {
        // ---
        let engine = self.alerts.as_ref()?;
        match engine.evaluate(category).await {
            Ok(announced) => announced,
            Err(e) => {
                tracing::warn!("Alert evaluation skipped: {}", e);
                None
            }
        }
    }
}

fn enrich(fields: &mut Record, reading: &AqiReading) {
    // ---
    fields.insert("AQI_value".to_string(), reading.value.into());
    if let Some(category) = reading.category {
        fields.insert("AQI_category".to_string(), category.into());
    }
}
