use axum::response::Json;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Health {
    status: String,
}

/// The model is loaded before the listener binds, so reaching this handler
/// means the detector is ready.
pub async fn healthcheck() -> Json<Health> {
    Json(Health {
        status: "Available".into(),
    })
}
