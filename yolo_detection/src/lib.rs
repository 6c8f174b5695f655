mod hub;
mod labels;
mod model_service;
mod ort_service;
mod processing;
mod routes;
mod server;
mod telemetry;

pub mod config;
pub mod detection;

pub use labels::ClassLabels;
pub use model_service::{ModelError, ModelService};
pub use routes::{detect_image, DetectError};
pub use server::{build_router, start_server, SharedState};
pub use telemetry::Metrics;
