//! User-initiated retries.
//!
//! A single job is admitted immediately when a slot is free. Bulk retries
//! only move jobs back to waiting and wake the sweeper, which admits them in
//! creation order as capacity allows.

use std::sync::Arc;
use tracing::info;

use super::admission::AdmissionController;
use super::sweeper::SweeperHandle;
use crate::database::models::{JobDbModel, JobStatus, Stage};
use crate::database::repositories::{BatchStatusUpdate, JobRepository};
use crate::{Error, Result};

pub struct RetryHandler {
    jobs: Arc<dyn JobRepository>,
    admission: Arc<AdmissionController>,
    sweeper: SweeperHandle,
}

impl RetryHandler {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        admission: Arc<AdmissionController>,
        sweeper: SweeperHandle,
    ) -> Self {
        Self {
            jobs,
            admission,
            sweeper,
        }
    }

    /// Reset one job and try to admit it right away.
    ///
    /// With no free slot the job stays in `waiting-to-process` for the
    /// sweeper and [`Error::ExceededLimit`] is returned. A queue rejection
    /// leaves it in `error-processing`; the job is returned either way.
    pub async fn retry_job(&self, id: &str) -> Result<JobDbModel> {
        self.jobs.get_job(id).await?;
        self.jobs
            .update_job_status(id, JobStatus::WaitingToProcess)
            .await?;

        let report = self
            .admission
            .dispatch(Stage::Process, &[id.to_string()])
            .await?;

        if report.enqueued.is_empty() && report.rejected.is_empty() {
            if report.skipped.is_empty() {
                info!(job_id = %id, "Retry deferred, no free slot");
                return Err(Error::ExceededLimit {
                    in_flight: report.in_flight,
                    limit: self.admission.max_concurrent(),
                });
            }
            // The sweeper may have admitted the job between reset and dispatch.
            let job = self.jobs.get_job(id).await?;
            if job.job_status() == Some(JobStatus::QueuedProcessing) {
                info!(job_id = %id, "Job retried, admitted by sweeper");
                return Ok(job);
            }
            return Err(Error::unprocessable(format!(
                "job {} changed status during retry",
                id
            )));
        }

        info!(job_id = %id, enqueued = !report.enqueued.is_empty(), "Job retried");
        self.jobs.get_job(id).await
    }

    /// Reset every job of a request, whatever its status, for the sweeper.
    pub async fn retry_request(&self, request_id: &str) -> Result<Vec<String>> {
        self.jobs.get_request(request_id).await?;
        let ids = self.jobs.reset_jobs_by_request(request_id).await?;
        info!(request_id = %request_id, jobs = ids.len(), "Request retried");
        if !ids.is_empty() {
            self.sweeper.trigger();
        }
        Ok(ids)
    }

    /// Reset the given jobs for the sweeper. Unknown IDs are reported back;
    /// if none of the IDs exist the call is NotFound.
    pub async fn retry_jobs(&self, ids: &[String]) -> Result<BatchStatusUpdate> {
        if ids.is_empty() {
            return Err(Error::validation("ids must not be empty"));
        }
        let result = self
            .jobs
            .batch_update_job_status(ids, JobStatus::WaitingToProcess)
            .await?;
        if result.updated.is_empty() {
            return Err(Error::not_found("Job", ids.join(",")));
        }
        info!(
            updated = result.updated.len(),
            missing = result.missing.len(),
            "Jobs retried"
        );
        self.sweeper.trigger();
        Ok(result)
    }
}
