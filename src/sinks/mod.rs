//! Destinations for accepted measurements.
//!
//! Every destination is a [`Sink`]. `main.rs` assembles the enabled sinks into
//! a capability list once at startup and hands it to the pipeline, which only
//! iterates over whatever was registered.

use async_trait::async_trait;

use crate::error::SinkError;
use crate::models::Measurement;

mod discovery;
mod influx;
mod metrics;
mod mqtt;

pub use discovery::{classify_field, Claim, DiscoveryCache, DiscoverySink, FieldMetadata, Publisher};
pub use influx::{line_protocol, InfluxClient};
pub use metrics::{MetricsSink, TimeSeriesStore};
pub use mqtt::MqttPublisher;

// ---

#[async_trait]
pub trait Sink: Send + Sync {
    // ---
    /// Short name used in logs and in per-sink outcomes.
    fn name(&self) -> &'static str;

    /// True when a successful delivery makes the measurement visible to the
    /// alert ledger.
    fn records_history(&self) -> bool {
        false
    }

    async fn deliver(&self, measurement: &Measurement) -> Result<(), SinkError>;
}
