//! Error taxonomy for the ingestion core.
//!
//! Only [`IngestError`] ever reaches the caller as a failure. Sink and alert
//! errors are scoped to a single sink call or a single alert evaluation and
//! end up as logged, partial-success outcomes.

use std::time::Duration;

use thiserror::Error;

// ---

/// Rejects a report before any sink is touched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    // ---
    /// A `sensordatavalues` entry did not hold a finite base-10 number.
    #[error("malformed value for '{value_type}': '{value}'")]
    MalformedValue { value_type: String, value: String },
}

/// Failure of one sink for one request.
#[derive(Error, Debug)]
pub enum SinkError {
    // ---
    /// Network or protocol failure talking to the backend.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered but refused the write.
    #[error("backend rejected write with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The MQTT client could not queue the publish.
    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// No live broker connection to publish on.
    #[error("not connected to broker")]
    Disconnected,

    /// The sink did not finish within its time budget.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Payload could not be encoded for the backend.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Failure while evaluating or delivering an alert.
#[derive(Error, Debug)]
pub enum AlertError {
    // ---
    /// The ledger could not be read or appended to.
    #[error("alert ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// The notification gateway refused or could not be reached.
    #[error("notification delivery failed: {0}")]
    Notify(String),
}

impl From<reqwest::Error> for AlertError {
    fn from(e: reqwest::Error) -> Self {
        AlertError::LedgerUnavailable(e.to_string())
    }
}
