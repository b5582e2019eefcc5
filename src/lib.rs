//! Ingestion core of the `feinstaub-bridge` service.
//!
//! Sensor reports flow strictly forward:
//! raw report -> [`normalize`] -> [`aqi`] enrichment -> [`sinks`] fan-out ->
//! [`alert`] evaluation, orchestrated per request by [`Pipeline`].
//! The HTTP transport in [`routes`] and the environment loader in [`config`]
//! are thin plumbing around it.

pub mod alert;
pub mod aqi;
pub mod config;
pub mod error;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod routes;
pub mod sinks;

pub use config::Config;
pub use error::{AlertError, IngestError, SinkError};
pub use pipeline::Pipeline;

// Re-exported for routes/*.rs, which only know their parent module.
pub use models::{IngestResult, RawReport};
