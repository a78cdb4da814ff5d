//! Second-stage admission: merging a video format with its audio.

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::admission::AdmissionController;
use super::audio::AudioMatcher;
use crate::database::models::{
    ConvertFormatStatus, FormatDbModel, JobDbModel, JobStatus, MergedFormatDbModel, Stage,
};
use crate::database::repositories::{FormatRepository, JobRepository};
use crate::{Error, Result};

/// Where a format can be fetched from, if anywhere yet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDownload {
    pub job: JobDbModel,
    pub download_url: Option<String>,
}

pub struct ConvertService {
    jobs: Arc<dyn JobRepository>,
    formats: Arc<dyn FormatRepository>,
    admission: Arc<AdmissionController>,
    matcher: Arc<dyn AudioMatcher>,
}

impl ConvertService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        formats: Arc<dyn FormatRepository>,
        admission: Arc<AdmissionController>,
        matcher: Arc<dyn AudioMatcher>,
    ) -> Self {
        Self {
            jobs,
            formats,
            admission,
            matcher,
        }
    }

    /// Load a job and one of its formats, NotFound if either is missing.
    async fn job_format(
        &self,
        job_id: &str,
        format_id: &str,
    ) -> Result<(JobDbModel, FormatDbModel, Vec<FormatDbModel>)> {
        let job = self.jobs.get_job(job_id).await?;
        let formats = self.formats.list_formats_by_job(job_id).await?;
        let format = formats
            .iter()
            .find(|f| f.id == format_id)
            .cloned()
            .ok_or_else(|| {
                Error::not_found("Format", format!("{} for job {}", format_id, job_id))
            })?;
        Ok((job, format, formats))
    }

    /// Create (or reuse) the merged format for `format_id` and try to admit it.
    ///
    /// Without a free slot the row stays in `waiting-to-convert` for the
    /// sweeper. A queue rejection also leaves it waiting.
    pub async fn request_convert(
        &self,
        job_id: &str,
        format_id: &str,
    ) -> Result<MergedFormatDbModel> {
        let (job, video, formats) = self.job_format(job_id, format_id).await?;

        if job.job_status() != Some(JobStatus::FinishedProcessing) {
            return Err(Error::unprocessable(format!(
                "job {} is not finished processing (status: {})",
                job_id, job.status
            )));
        }

        let audio = self.matcher.match_audio(&video, &formats)?;
        let merged = self
            .formats
            .insert_merged_format(&MergedFormatDbModel::new(job_id, &audio.id, &video.id))
            .await?;

        if merged.convert_status() == Some(ConvertFormatStatus::WaitingToConvert) {
            let report = self
                .admission
                .dispatch(Stage::Convert, &[merged.id.clone()])
                .await?;
            info!(
                merged_format_id = %merged.id,
                job_id = %job_id,
                queued = !report.enqueued.is_empty(),
                "Conversion requested"
            );
        }

        self.formats.get_merged_format(&merged.id).await
    }

    /// Download URL for a format: its own URL when it carries audio, else the
    /// merged deliverable once converted.
    pub async fn download_url(&self, job_id: &str, format_id: &str) -> Result<FormatDownload> {
        let (job, format, _) = self.job_format(job_id, format_id).await?;

        let download_url = if format.has_audio() {
            Some(format.url)
        } else {
            self.formats
                .find_merged_format(job_id, format_id)
                .await?
                .and_then(|m| m.download_url)
        };

        Ok(FormatDownload { job, download_url })
    }
}
