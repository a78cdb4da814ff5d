//! Format download routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::database::models::FormatDbModel;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/downloads/{format_id}", get(get_download))
        .route("/downloads/{format_id}/start", post(start_download))
        .route("/downloads/{format_id}/cancel", post(cancel_download))
}

async fn get_download(
    State(state): State<AppState>,
    Path(format_id): Path<String>,
) -> ApiResult<Json<FormatDbModel>> {
    Ok(Json(state.services.downloads.get(&format_id).await?))
}

async fn start_download(
    State(state): State<AppState>,
    Path(format_id): Path<String>,
) -> ApiResult<Json<FormatDbModel>> {
    Ok(Json(state.services.downloads.start(&format_id).await?))
}

async fn cancel_download(
    State(state): State<AppState>,
    Path(format_id): Path<String>,
) -> ApiResult<Json<FormatDbModel>> {
    Ok(Json(state.services.downloads.cancel(&format_id).await?))
}
