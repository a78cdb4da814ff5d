//! Job, request, retry and convert routes.

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    routing::{get, post, put},
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{
    BulkRetryRequest, BulkRetryResponse, SubmitJobsRequest, SubmitJobsResponse,
};
use crate::api::server::AppState;
use crate::database::models::{JobDbModel, MergedFormatDbModel};
use crate::pipeline::{FormatDownload, JobDetails};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(submit_jobs))
        .route("/jobs/retry", post(retry_bulk))
        .route("/retry", post(retry_bulk))
        .route("/jobs/retry/{job_id}", post(retry_job))
        .route("/jobs/{job_id}", get(get_job).put(cancel_job))
        .route("/jobs/{job_id}/cancel", put(cancel_job))
        .route(
            "/jobs/{job_id}/{format_id}",
            get(get_format_download).post(convert_format),
        )
        .route("/requests/{request_id}", get(get_request))
}

/// Create jobs for a list of URLs and admit what fits.
async fn submit_jobs(
    State(state): State<AppState>,
    payload: Result<Json<SubmitJobsRequest>, JsonRejection>,
) -> ApiResult<Json<SubmitJobsResponse>> {
    let Json(body) = payload?;
    let submission = state
        .services
        .jobs
        .submit(body.request_id.as_deref(), &body.urls)
        .await?;
    Ok(Json(SubmitJobsResponse {
        request_id: submission.request_id,
        job_ids: submission.job_ids,
    }))
}

async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobDetails>> {
    Ok(Json(state.services.jobs.get_job(&job_id).await?))
}

async fn get_request(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<Vec<JobDetails>>> {
    Ok(Json(state.services.jobs.list_request(&request_id).await?))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobDbModel>> {
    Ok(Json(state.services.reconciler.cancel_job(&job_id).await?))
}

async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobDbModel>> {
    Ok(Json(state.services.retry.retry_job(&job_id).await?))
}

async fn retry_bulk(
    State(state): State<AppState>,
    payload: Result<Json<BulkRetryRequest>, JsonRejection>,
) -> ApiResult<Json<BulkRetryResponse>> {
    let Json(body) = payload?;

    let response = match (body.ids, body.request_id) {
        (Some(ids), _) if !ids.is_empty() => {
            let result = state.services.retry.retry_jobs(&ids).await?;
            BulkRetryResponse {
                retried: result.updated,
                missing: result.missing,
            }
        }
        (_, Some(request_id)) => BulkRetryResponse {
            retried: state.services.retry.retry_request(&request_id).await?,
            missing: Vec::new(),
        },
        _ => return Err(ApiError::bad_request("Either ids or requestId is required")),
    };
    Ok(Json(response))
}

async fn get_format_download(
    State(state): State<AppState>,
    Path((job_id, format_id)): Path<(String, String)>,
) -> ApiResult<Json<FormatDownload>> {
    Ok(Json(
        state
            .services
            .converts
            .download_url(&job_id, &format_id)
            .await?,
    ))
}

/// Request the merged video+audio deliverable for a video format.
async fn convert_format(
    State(state): State<AppState>,
    Path((job_id, format_id)): Path<(String, String)>,
) -> ApiResult<Json<MergedFormatDbModel>> {
    Ok(Json(
        state
            .services
            .converts
            .request_convert(&job_id, &format_id)
            .await?,
    ))
}
