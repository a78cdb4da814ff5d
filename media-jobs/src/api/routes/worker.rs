//! Callbacks for queue consumers.
//!
//! Workers report progress and results here. An event for a row that has
//! moved on (cancelled, already finished) is accepted with `applied: false`.

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    routing::post,
};

use crate::api::error::ApiResult;
use crate::api::models::{
    DeadLetterRequest, FinishProcessingRequest, FinishWithUrlRequest, WorkerEventResponse,
};
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/worker/jobs/{job_id}/start", post(start_processing))
        .route("/worker/jobs/{job_id}/finish", post(finish_processing))
        .route("/worker/jobs/{job_id}/fail", post(fail_processing))
        .route("/worker/converts/{id}/start", post(start_converting))
        .route("/worker/converts/{id}/finish", post(finish_converting))
        .route("/worker/converts/{id}/fail", post(fail_converting))
        .route("/worker/downloads/{format_id}/start", post(start_downloading))
        .route("/worker/downloads/{format_id}/finish", post(finish_downloading))
        .route("/worker/downloads/{format_id}/fail", post(fail_downloading))
        .route("/worker/dead-letter", post(dead_letter))
}

fn applied(applied: bool) -> Json<WorkerEventResponse> {
    Json(WorkerEventResponse { applied })
}

async fn start_processing(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<WorkerEventResponse>> {
    Ok(applied(
        state.services.reconciler.start_processing(&job_id).await?,
    ))
}

async fn finish_processing(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    payload: Result<Json<FinishProcessingRequest>, JsonRejection>,
) -> ApiResult<Json<WorkerEventResponse>> {
    let Json(body) = payload?;
    Ok(applied(
        state
            .services
            .reconciler
            .finish_processing(&job_id, body.title.as_deref(), body.formats)
            .await?,
    ))
}

async fn fail_processing(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<WorkerEventResponse>> {
    Ok(applied(
        state.services.reconciler.fail_processing(&job_id).await?,
    ))
}

async fn start_converting(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkerEventResponse>> {
    Ok(applied(state.services.reconciler.start_converting(&id).await?))
}

async fn finish_converting(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<FinishWithUrlRequest>, JsonRejection>,
) -> ApiResult<Json<WorkerEventResponse>> {
    let Json(body) = payload?;
    Ok(applied(
        state
            .services
            .reconciler
            .finish_converting(&id, &body.download_url)
            .await?,
    ))
}

async fn fail_converting(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkerEventResponse>> {
    Ok(applied(state.services.reconciler.fail_converting(&id).await?))
}

async fn start_downloading(
    State(state): State<AppState>,
    Path(format_id): Path<String>,
) -> ApiResult<Json<WorkerEventResponse>> {
    Ok(applied(
        state
            .services
            .reconciler
            .start_downloading(&format_id)
            .await?,
    ))
}

async fn finish_downloading(
    State(state): State<AppState>,
    Path(format_id): Path<String>,
    payload: Result<Json<FinishWithUrlRequest>, JsonRejection>,
) -> ApiResult<Json<WorkerEventResponse>> {
    let Json(body) = payload?;
    Ok(applied(
        state
            .services
            .reconciler
            .finish_downloading(&format_id, &body.download_url)
            .await?,
    ))
}

async fn fail_downloading(
    State(state): State<AppState>,
    Path(format_id): Path<String>,
) -> ApiResult<Json<WorkerEventResponse>> {
    Ok(applied(
        state
            .services
            .reconciler
            .fail_downloading(&format_id)
            .await?,
    ))
}

async fn dead_letter(
    State(state): State<AppState>,
    payload: Result<Json<DeadLetterRequest>, JsonRejection>,
) -> ApiResult<Json<WorkerEventResponse>> {
    let Json(body) = payload?;
    Ok(applied(
        state
            .services
            .reconciler
            .dead_letter(body.queue, &body.id)
            .await?,
    ))
}
