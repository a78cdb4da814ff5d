//! Status transitions driven by users and workers.
//!
//! Worker events are conditional on the row's current status so that a late
//! or duplicated delivery cannot overwrite a cancellation or a newer result.
//! Every transition that frees a slot wakes the sweeper.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::sweeper::SweeperHandle;
use crate::database::models::{
    ConvertFormatStatus, DownloadStatus, JobDbModel, JobStatus, NewFormat,
};
use crate::database::repositories::{FormatRepository, JobRepository};
use crate::queue::QueueName;
use crate::Result;

const PROCESS_ACTIVE: &[JobStatus] = &[JobStatus::QueuedProcessing, JobStatus::Processing];
const CONVERT_ACTIVE: &[ConvertFormatStatus] = &[
    ConvertFormatStatus::QueuedConverting,
    ConvertFormatStatus::Converting,
];
const DOWNLOAD_ACTIVE: &[DownloadStatus] = &[
    DownloadStatus::QueuedDownloading,
    DownloadStatus::Downloading,
];

pub struct StatusReconciler {
    jobs: Arc<dyn JobRepository>,
    formats: Arc<dyn FormatRepository>,
    sweeper: SweeperHandle,
}

impl StatusReconciler {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        formats: Arc<dyn FormatRepository>,
        sweeper: SweeperHandle,
    ) -> Self {
        Self {
            jobs,
            formats,
            sweeper,
        }
    }

    /// Mark a job cancelled. Its slot, if any, is freed immediately; a worker
    /// already running it is expected to notice and drop its result.
    pub async fn cancel_job(&self, id: &str) -> Result<JobDbModel> {
        let previous = self.jobs.get_job(id).await?;
        let job = self.jobs.update_job_status(id, JobStatus::Cancelled).await?;
        info!(job_id = %id, from = %previous.status, "Job cancelled");
        if previous.job_status().is_some_and(|s| s.is_in_flight()) {
            self.sweeper.trigger();
        }
        Ok(job)
    }

    pub async fn start_processing(&self, id: &str) -> Result<bool> {
        let applied = self
            .jobs
            .transition_job_status(id, PROCESS_ACTIVE, JobStatus::Processing)
            .await?;
        self.log_event("start_processing", id, applied);
        Ok(applied)
    }

    pub async fn finish_processing(
        &self,
        id: &str,
        title: Option<&str>,
        formats: Vec<NewFormat>,
    ) -> Result<bool> {
        let count = formats.len();
        let applied = self.jobs.finish_processing(id, title, formats).await?;
        if applied {
            info!(job_id = %id, formats = count, "Job finished processing");
            self.sweeper.trigger();
        } else {
            debug!(job_id = %id, "Discarding processing result for cancelled job");
        }
        Ok(applied)
    }

    pub async fn fail_processing(&self, id: &str) -> Result<bool> {
        let applied = self
            .jobs
            .transition_job_status(id, PROCESS_ACTIVE, JobStatus::ErrorProcessing)
            .await?;
        self.log_event("fail_processing", id, applied);
        if applied {
            self.sweeper.trigger();
        }
        Ok(applied)
    }

    pub async fn start_converting(&self, id: &str) -> Result<bool> {
        let applied = self
            .formats
            .transition_merged_status(id, CONVERT_ACTIVE, ConvertFormatStatus::Converting)
            .await?;
        self.log_event("start_converting", id, applied);
        Ok(applied)
    }

    pub async fn finish_converting(&self, id: &str, download_url: &str) -> Result<bool> {
        let applied = self.formats.finish_converting(id, download_url).await?;
        self.log_event("finish_converting", id, applied);
        if applied {
            self.sweeper.trigger();
        }
        Ok(applied)
    }

    pub async fn fail_converting(&self, id: &str) -> Result<bool> {
        let applied = self
            .formats
            .transition_merged_status(id, CONVERT_ACTIVE, ConvertFormatStatus::ErrorConverting)
            .await?;
        self.log_event("fail_converting", id, applied);
        if applied {
            self.sweeper.trigger();
        }
        Ok(applied)
    }

    pub async fn start_downloading(&self, id: &str) -> Result<bool> {
        let applied = self
            .formats
            .transition_download_status(id, DOWNLOAD_ACTIVE, DownloadStatus::Downloading)
            .await?;
        self.log_event("start_downloading", id, applied);
        Ok(applied)
    }

    /// Discarded when the download was cancelled (status cleared) meanwhile.
    pub async fn finish_downloading(&self, id: &str, download_url: &str) -> Result<bool> {
        let applied = self.formats.finish_download(id, download_url).await?;
        self.log_event("finish_downloading", id, applied);
        Ok(applied)
    }

    pub async fn fail_downloading(&self, id: &str) -> Result<bool> {
        let applied = self
            .formats
            .transition_download_status(id, DOWNLOAD_ACTIVE, DownloadStatus::ErrorDownloading)
            .await?;
        self.log_event("fail_downloading", id, applied);
        Ok(applied)
    }

    /// A message exhausted its deliveries. The unit it names is failed so it
    /// stops holding a slot.
    pub async fn dead_letter(&self, queue: QueueName, id: &str) -> Result<bool> {
        warn!(queue = %queue, id = %id, "Message dead-lettered");
        match queue {
            QueueName::Process => self.fail_processing(id).await,
            QueueName::Convert => self.fail_converting(id).await,
            QueueName::Download => self.fail_downloading(id).await,
        }
    }

    fn log_event(&self, event: &'static str, id: &str, applied: bool) {
        if applied {
            debug!(id = %id, event, "Status updated");
        } else {
            debug!(id = %id, event, "Ignoring event for row in another status");
        }
    }
}
