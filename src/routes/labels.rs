use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct LabelsResponse {
    labels: Vec<String>,
}

pub async fn labels<M: ModelService>(State(state): State<SharedState<M>>) -> Json<LabelsResponse> {
    Json(LabelsResponse {
        labels: state.classifier.labels().as_slice().to_vec(),
    })
}
