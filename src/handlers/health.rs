//! Health check handler

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::logic::ModelState;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    model: ModelState,
    timestamp: i64,
}

pub async fn check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        model: state.models.state(),
        timestamp: chrono::Utc::now().timestamp(),
    })
}
