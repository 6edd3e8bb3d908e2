use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::AppState;

/// Upstream API health; 503 while the monitor reports unhealthy.
#[axum::debug_handler(state = AppState)]
pub async fn api_health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.monitor.health();
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

#[axum::debug_handler(state = AppState)]
pub async fn reset_stats(State(state): State<AppState>) -> impl IntoResponse {
    state.monitor.reset();
    StatusCode::NO_CONTENT
}
