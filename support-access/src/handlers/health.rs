use axum::{extract::State, Json};

use crate::{dtos::HealthResponse, AppState};

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: state.config.service_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
