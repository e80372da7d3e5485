use axum::response::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn healthcheck() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Available",
        version: env!("CARGO_PKG_VERSION"),
    })
}
