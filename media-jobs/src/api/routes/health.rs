//! Health check route.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::error::ApiResult;
use crate::api::models::HealthResponse;
use crate::api::server::AppState;
use crate::database::time::ms_to_datetime;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Liveness plus the current load against the concurrency ceiling. A failing
/// database read surfaces as a 500.
async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let admission = &state.services.admission;
    let in_flight = admission.in_flight().await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: ms_to_datetime(state.started_at),
        uptime_secs: state.start_time.elapsed().as_secs(),
        in_flight,
        max_concurrent: admission.max_concurrent(),
    }))
}
