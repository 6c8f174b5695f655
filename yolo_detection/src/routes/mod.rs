mod detect;
mod health;
mod labels;
mod metrics;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub use detect::{detect_image, DetectError};

pub const DETECT_ROUTE: &str = "/detect/";

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route(DETECT_ROUTE, post(detect::detect_objects))
        .route("/detect", post(detect::detect_objects))
        .route("/labels", get(labels::class_labels))
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
}
