// src/routes/health.rs
//! Liveness endpoint for the feinstaub bridge.
//!
//! `GET /health` answers as long as the process serves HTTP and lists the
//! sinks registered at startup. It never contacts InfluxDB, the MQTT broker
//! or the notification gateway, so a degraded destination does not make the
//! bridge look dead to the orchestrator restarting it.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::Pipeline;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sinks: Vec<&'static str>,
}

async fn health(State(pipeline): State<Arc<Pipeline>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sinks: pipeline.sink_names(),
    })
}

pub fn router() -> Router<Arc<Pipeline>> {
    Router::new().route("/health", get(health))
}
