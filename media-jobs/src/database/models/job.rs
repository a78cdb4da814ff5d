//! Request and job database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// Placeholder title used until the processing worker reports the real one.
pub const DEFAULT_JOB_TITLE: &str = "-";

/// A user submission grouping one or more jobs.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDbModel {
    pub id: String,
    /// Unix epoch milliseconds
    pub created_at: i64,
}

impl RequestDbModel {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now_ms(),
        }
    }
}

impl Default for RequestDbModel {
    fn default() -> Self {
        Self::new()
    }
}

/// One submitted link and the status of its processing pipeline.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDbModel {
    pub id: String,
    pub request_id: String,
    pub url: String,
    pub title: Option<String>,
    /// One of the [`JobStatus`] kebab-case values
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl JobDbModel {
    /// New job in `waiting-to-process`.
    pub fn new(request_id: impl Into<String>, url: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            url: url.into(),
            title: Some(DEFAULT_JOB_TITLE.to_string()),
            status: JobStatus::WaitingToProcess.as_str().to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn job_status(&self) -> Option<JobStatus> {
        self.status.parse().ok()
    }
}

/// Processing pipeline status of a job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    WaitingToProcess,
    QueuedProcessing,
    Processing,
    FinishedProcessing,
    ErrorProcessing,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingToProcess => "waiting-to-process",
            Self::QueuedProcessing => "queued-processing",
            Self::Processing => "processing",
            Self::FinishedProcessing => "finished-processing",
            Self::ErrorProcessing => "error-processing",
            Self::Cancelled => "cancelled",
        }
    }

    /// Statuses that occupy a slot of the shared concurrency ceiling.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::QueuedProcessing | Self::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::FinishedProcessing | Self::ErrorProcessing | Self::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_new() {
        let job = JobDbModel::new("req-1", "https://example.com/watch?v=1");
        assert_eq!(job.status, "waiting-to-process");
        assert_eq!(job.title.as_deref(), Some(DEFAULT_JOB_TITLE));
        assert_eq!(job.job_status(), Some(JobStatus::WaitingToProcess));
    }

    #[test]
    fn test_status_strings_match_strum() {
        for status in [
            JobStatus::WaitingToProcess,
            JobStatus::QueuedProcessing,
            JobStatus::Processing,
            JobStatus::FinishedProcessing,
            JobStatus::ErrorProcessing,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.to_string(), status.as_str());
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_in_flight_and_terminal() {
        assert!(JobStatus::QueuedProcessing.is_in_flight());
        assert!(JobStatus::Processing.is_in_flight());
        assert!(!JobStatus::WaitingToProcess.is_in_flight());
        assert!(!JobStatus::Cancelled.is_in_flight());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }
}
