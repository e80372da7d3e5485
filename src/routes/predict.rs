use super::ErrorBody;
use crate::{
    classifier::{PredictError, Prediction},
    model_service::ModelService,
    server::SharedState,
    telemetry::Outcome,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use std::time::Instant;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    /// Base64-encoded image bytes.
    pub image: String,
}

#[instrument(skip(state, payload))]
pub async fn predict<M: ModelService>(
    State(state): State<SharedState<M>>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<Prediction>, PredictError> {
    let start = Instant::now();
    let result = classify(&state, payload).await;

    let outcome = match &result {
        Ok(_) => Outcome::Ok,
        Err(e) if e.is_client_error() => Outcome::ClientError,
        Err(_) => Outcome::ServerError,
    };
    state
        .metrics
        .record_prediction(outcome, start.elapsed().as_millis() as u64);

    result.map(Json)
}

async fn classify<M: ModelService>(
    state: &SharedState<M>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Prediction, PredictError> {
    let Json(request) = payload.map_err(|e| PredictError::MalformedRequest {
        status: e.status().as_u16(),
        message: e.body_text(),
    })?;

    let classifier = state.classifier.clone();
    let prediction =
        tokio::task::spawn_blocking(move || classifier.classify_base64(&request.image))
            .await
            .map_err(|e| PredictError::Worker(e.to_string()))??;

    tracing::info!("Predicted class {}", prediction.class);
    Ok(prediction)
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let status = if let PredictError::MalformedRequest { status, .. } = &self {
            tracing::warn!("Rejected prediction request: {}", self);
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
        } else if self.is_client_error() {
            tracing::warn!("Rejected prediction request: {}", self);
            StatusCode::BAD_REQUEST
        } else {
            tracing::error!("Prediction failed: {}", self);
            StatusCode::INTERNAL_SERVER_ERROR
        };

        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
