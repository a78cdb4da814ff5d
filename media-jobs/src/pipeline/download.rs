//! Format download requests.
//!
//! Downloads do not count against the shared ceiling; a start request goes
//! straight to the download queue.

use std::sync::Arc;
use tracing::{info, warn};

use crate::database::models::{DownloadStatus, FormatDbModel};
use crate::database::repositories::FormatRepository;
use crate::queue::{EnqueueReport, QueueGateway, QueueName};
use crate::{Error, Result};

pub struct DownloadService {
    formats: Arc<dyn FormatRepository>,
    queue: Arc<dyn QueueGateway>,
}

impl DownloadService {
    pub fn new(formats: Arc<dyn FormatRepository>, queue: Arc<dyn QueueGateway>) -> Self {
        Self { formats, queue }
    }

    pub async fn get(&self, format_id: &str) -> Result<FormatDbModel> {
        self.formats.get_format(format_id).await
    }

    /// Queue a format for download.
    ///
    /// A refused message leaves the format in `error-downloading`. If the
    /// queue cannot be reached the previous status is restored and the error
    /// returned.
    pub async fn start(&self, format_id: &str) -> Result<FormatDbModel> {
        let format = self.formats.get_format(format_id).await?;
        if format.download_url.is_some() {
            return Err(Error::validation(format!(
                "format {} is already downloaded",
                format_id
            )));
        }

        let previous = format.download_status();
        self.formats
            .set_download_status(format_id, Some(DownloadStatus::QueuedDownloading))
            .await?;

        let ids = [format_id.to_string()];
        let outcomes = match self.queue.enqueue(QueueName::Download, &ids).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                if let Err(restore_err) =
                    self.formats.set_download_status(format_id, previous).await
                {
                    warn!(
                        format_id = %format_id,
                        "Failed to restore download status: {}", restore_err
                    );
                }
                return Err(Error::Queue(e));
            }
        };

        let report = EnqueueReport::from_outcomes(&ids, outcomes);
        if let Some((_, reason)) = report.failed.first() {
            warn!(format_id = %format_id, "Download queue rejected message: {}", reason);
            return self
                .formats
                .set_download_status(format_id, Some(DownloadStatus::ErrorDownloading))
                .await;
        }

        info!(format_id = %format_id, "Download queued");
        self.formats.get_format(format_id).await
    }

    /// Clear the download status. A running download finishes unobserved.
    pub async fn cancel(&self, format_id: &str) -> Result<FormatDbModel> {
        let format = self.formats.set_download_status(format_id, None).await?;
        info!(format_id = %format_id, "Download cancelled");
        Ok(format)
    }
}
