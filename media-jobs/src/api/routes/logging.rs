//! Runtime log filter routes.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::get,
};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{LogFilterResponse, LogModule, UpdateLogFilterRequest};
use crate::api::server::AppState;
use crate::logging::{LoggingConfig, available_modules};

pub fn router() -> Router<AppState> {
    Router::new().route("/logging/filter", get(get_filter).put(set_filter))
}

fn logging_config(state: &AppState) -> ApiResult<&Arc<LoggingConfig>> {
    state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::internal("Logging is not configured"))
}

fn filter_response(config: &LoggingConfig) -> LogFilterResponse {
    LogFilterResponse {
        filter: config.get_filter(),
        modules: available_modules()
            .into_iter()
            .map(|(name, description)| LogModule {
                name: name.to_string(),
                description: description.to_string(),
            })
            .collect(),
    }
}

async fn get_filter(State(state): State<AppState>) -> ApiResult<Json<LogFilterResponse>> {
    let config = logging_config(&state)?;
    Ok(Json(filter_response(config)))
}

async fn set_filter(
    State(state): State<AppState>,
    payload: Result<Json<UpdateLogFilterRequest>, JsonRejection>,
) -> ApiResult<Json<LogFilterResponse>> {
    let Json(body) = payload?;
    let config = logging_config(&state)?;
    config.set_filter(&body.filter)?;
    Ok(Json(filter_response(config)))
}
