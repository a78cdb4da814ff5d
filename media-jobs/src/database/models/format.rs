//! Format and merged format database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// A source variant (resolution/codec/container) discovered for a job.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDbModel {
    pub id: String,
    pub job_id: String,
    /// Extractor-specific format identifier
    pub format_id: String,
    pub ext: String,
    pub resolution: Option<String>,
    pub acodec: Option<String>,
    pub vcodec: Option<String>,
    /// Size in bytes, when known
    pub filesize: Option<i64>,
    /// Total bitrate as reported by the extractor
    pub tbr: Option<String>,
    pub url: String,
    pub language: Option<String>,
    pub format_note: Option<String>,
    pub download_url: Option<String>,
    /// One of the [`DownloadStatus`] values, or NULL when not started/cancelled
    pub download_status: Option<String>,
    pub created_at: i64,
}

impl FormatDbModel {
    pub fn has_audio(&self) -> bool {
        codec_present(self.acodec.as_deref())
    }

    pub fn has_video(&self) -> bool {
        codec_present(self.vcodec.as_deref())
    }

    pub fn total_bitrate(&self) -> f64 {
        self.tbr
            .as_deref()
            .and_then(|tbr| tbr.parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    pub fn download_status(&self) -> Option<DownloadStatus> {
        self.download_status.as_deref().and_then(|s| s.parse().ok())
    }
}

/// Extractors report a missing stream as the literal codec `none`.
fn codec_present(codec: Option<&str>) -> bool {
    matches!(codec, Some(c) if !c.is_empty() && c != "none")
}

/// Format data reported by the processing worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFormat {
    pub format_id: String,
    pub ext: String,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub filesize: Option<i64>,
    #[serde(default)]
    pub tbr: Option<String>,
    pub url: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub format_note: Option<String>,
}

impl NewFormat {
    pub fn into_model(self, job_id: &str) -> FormatDbModel {
        FormatDbModel {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            format_id: self.format_id,
            ext: self.ext,
            resolution: self.resolution,
            acodec: self.acodec,
            vcodec: self.vcodec,
            filesize: self.filesize,
            tbr: self.tbr,
            url: self.url,
            language: self.language,
            format_note: self.format_note,
            download_url: None,
            download_status: None,
            created_at: now_ms(),
        }
    }
}

/// Format-level download pipeline, independent of job processing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DownloadStatus {
    WaitingToDownload,
    QueuedDownloading,
    Downloading,
    FinishedDownloading,
    ErrorDownloading,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingToDownload => "waiting-to-download",
            Self::QueuedDownloading => "queued-downloading",
            Self::Downloading => "downloading",
            Self::FinishedDownloading => "finished-downloading",
            Self::ErrorDownloading => "error-downloading",
        }
    }
}

/// A video-only format combined with a matching audio format.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedFormatDbModel {
    pub id: String,
    pub job_id: String,
    pub audio_format_id: String,
    pub video_format_id: String,
    /// One of the [`ConvertFormatStatus`] values
    pub status: String,
    pub download_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MergedFormatDbModel {
    /// New merged format in `waiting-to-convert`.
    pub fn new(
        job_id: impl Into<String>,
        audio_format_id: impl Into<String>,
        video_format_id: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            audio_format_id: audio_format_id.into(),
            video_format_id: video_format_id.into(),
            status: ConvertFormatStatus::WaitingToConvert.as_str().to_string(),
            download_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn convert_status(&self) -> Option<ConvertFormatStatus> {
        self.status.parse().ok()
    }
}

/// Convert stage status of a merged format.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ConvertFormatStatus {
    WaitingToConvert,
    QueuedConverting,
    Converting,
    FinishedConverting,
    ErrorConverting,
}

impl ConvertFormatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingToConvert => "waiting-to-convert",
            Self::QueuedConverting => "queued-converting",
            Self::Converting => "converting",
            Self::FinishedConverting => "finished-converting",
            Self::ErrorConverting => "error-converting",
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::QueuedConverting | Self::Converting)
    }
}
