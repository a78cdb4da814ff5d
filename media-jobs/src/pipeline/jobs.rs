//! Job submission and read models.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::admission::{AdmissionController, DispatchReport};
use crate::database::models::{FormatDbModel, JobDbModel, MergedFormatDbModel, Stage};
use crate::database::repositories::{FormatRepository, JobRepository};
use crate::{Error, Result};

/// A job with everything discovered for it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetails {
    #[serde(flatten)]
    pub job: JobDbModel,
    pub formats: Vec<FormatDbModel>,
    pub merged_formats: Vec<MergedFormatDbModel>,
}

/// Outcome of a submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub request_id: String,
    pub job_ids: Vec<String>,
    pub dispatch: DispatchReport,
}

pub struct JobService {
    jobs: Arc<dyn JobRepository>,
    formats: Arc<dyn FormatRepository>,
    admission: Arc<AdmissionController>,
}

fn validate_urls(urls: &[String]) -> Result<()> {
    if urls.is_empty() {
        return Err(Error::validation("urls must not be empty"));
    }
    for raw in urls {
        let parsed = url::Url::parse(raw)
            .map_err(|e| Error::validation(format!("invalid url '{}': {}", raw, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::validation(format!(
                "unsupported url scheme '{}' in '{}'",
                parsed.scheme(),
                raw
            )));
        }
    }
    Ok(())
}

impl JobService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        formats: Arc<dyn FormatRepository>,
        admission: Arc<AdmissionController>,
    ) -> Self {
        Self {
            jobs,
            formats,
            admission,
        }
    }

    /// Create one job per URL and admit as many as capacity allows. The rest
    /// wait for the sweeper.
    pub async fn submit(&self, request_id: Option<&str>, urls: &[String]) -> Result<Submission> {
        validate_urls(urls)?;

        let request = match request_id {
            Some(id) => self.jobs.get_request(id).await?,
            None => self.jobs.create_request().await?,
        };
        let jobs = self.jobs.create_jobs(&request.id, urls).await?;
        let job_ids: Vec<String> = jobs.into_iter().map(|j| j.id).collect();

        let dispatch = self.admission.dispatch(Stage::Process, &job_ids).await?;
        info!(
            request_id = %request.id,
            jobs = job_ids.len(),
            enqueued = dispatch.enqueued.len(),
            "Jobs submitted"
        );

        Ok(Submission {
            request_id: request.id,
            job_ids,
            dispatch,
        })
    }

    pub async fn get_job(&self, id: &str) -> Result<JobDetails> {
        let job = self.jobs.get_job(id).await?;
        let mut details = self.attach(vec![job]).await?;
        details.pop().ok_or_else(|| Error::not_found("Job", id))
    }

    /// Jobs of a request in creation order, without cancelled ones.
    pub async fn list_request(&self, request_id: &str) -> Result<Vec<JobDetails>> {
        self.jobs.get_request(request_id).await?;
        let jobs = self.jobs.list_jobs_by_request(request_id).await?;
        self.attach(jobs).await
    }

    async fn attach(&self, jobs: Vec<JobDbModel>) -> Result<Vec<JobDetails>> {
        let ids: Vec<String> = jobs.iter().map(|j| j.id.clone()).collect();

        let (all_formats, all_merged) = futures::try_join!(
            self.formats.list_formats_by_jobs(&ids),
            self.formats.list_merged_formats_by_jobs(&ids),
        )?;

        let mut formats: HashMap<String, Vec<FormatDbModel>> = HashMap::new();
        for format in all_formats {
            formats.entry(format.job_id.clone()).or_default().push(format);
        }
        let mut merged: HashMap<String, Vec<MergedFormatDbModel>> = HashMap::new();
        for m in all_merged {
            merged.entry(m.job_id.clone()).or_default().push(m);
        }

        Ok(jobs
            .into_iter()
            .map(|job| JobDetails {
                formats: formats.remove(&job.id).unwrap_or_default(),
                merged_formats: merged.remove(&job.id).unwrap_or_default(),
                job,
            })
            .collect())
    }
}
