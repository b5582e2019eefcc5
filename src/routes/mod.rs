use std::sync::Arc;

use axum::Router;

use crate::Pipeline;

mod health;
mod info;
mod upload;

// ---

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    // ---
    Router::new()
        .merge(upload::router())
        .merge(info::router())
        .merge(health::router())
        .with_state(pipeline)
}
