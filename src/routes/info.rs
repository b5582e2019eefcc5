//! Service identification endpoint.

use axum::{routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct InfoResponse {
    name: &'static str,
    version: &'static str,
}

/// Handle `GET /info`.
async fn info() -> Json<InfoResponse> {
    Json(InfoResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/info", get(info))
}
