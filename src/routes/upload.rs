// src/routes/upload.rs
//! Measurement upload endpoint used by the sensor firmware.
//!
//! `POST /upload_measurement` takes the firmware's JSON report, hands it to the
//! ingestion pipeline and answers with the per-sink outcome. Only a malformed
//! measurement value is a client error; degraded sinks still answer 200.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{Pipeline, RawReport};

// ---

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error,
        }),
    )
        .into_response()
}

pub fn router() -> Router<Arc<Pipeline>> {
    // ---
    Router::new().route("/upload_measurement", post(handler))
}

async fn handler(
    State(pipeline): State<Arc<Pipeline>>,
    body: Result<Json<RawReport>, JsonRejection>,
) -> Response {
    // ---
    let Json(report) = match body {
        Ok(report) => report,
        Err(rejection) => {
            warn!("POST /upload_measurement - undecodable body: {}", rejection.body_text());
            return error_response(rejection.status(), rejection.body_text());
        }
    };

    info!(
        "POST /upload_measurement - {} values",
        report.sensordatavalues.len()
    );

    match pipeline.ingest(&report).await {
        Ok(result) => {
            debug!("POST /upload_measurement - Returning OK");
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}
