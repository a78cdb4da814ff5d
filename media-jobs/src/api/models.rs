//! API request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::models::NewFormat;
use crate::queue::QueueName;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobsRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobsResponse {
    pub request_id: String,
    pub job_ids: Vec<String>,
}

/// Bulk retry selector. `ids` wins when both are given.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRetryRequest {
    #[serde(default)]
    pub ids: Option<Vec<String>>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRetryResponse {
    /// Jobs moved back to `waiting-to-process`.
    pub retried: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishProcessingRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub formats: Vec<NewFormat>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishWithUrlRequest {
    pub download_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeadLetterRequest {
    pub queue: QueueName,
    pub id: String,
}

/// Whether a worker event changed the row.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerEventResponse {
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub in_flight: u64,
    pub max_concurrent: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogModule {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogFilterResponse {
    pub filter: String,
    pub modules: Vec<LogModule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}
