use crate::server::SharedState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct ClassLabelsResponse {
    pub labels: Vec<String>,
}

pub async fn class_labels(State(state): State<SharedState>) -> Json<ClassLabelsResponse> {
    Json(ClassLabelsResponse {
        labels: state.model_service.class_labels().names().to_vec(),
    })
}
