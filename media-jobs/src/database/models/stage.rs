//! Pipeline stages that share the concurrency ceiling.

use serde::Serialize;

use super::{ConvertFormatStatus, JobStatus};
use crate::queue::QueueName;

/// A stage whose units go through waiting → queued → running and count
/// against the shared in-flight ceiling while queued or running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Jobs in the `job` table.
    Process,
    /// Merged formats in the `merged_format` table.
    Convert,
}

impl Stage {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Process => "job",
            Self::Convert => "merged_format",
        }
    }

    /// Status a unit waits in until admitted.
    pub fn pending_status(&self) -> &'static str {
        match self {
            Self::Process => JobStatus::WaitingToProcess.as_str(),
            Self::Convert => ConvertFormatStatus::WaitingToConvert.as_str(),
        }
    }

    /// Status that reserves a slot once admitted.
    pub fn queued_status(&self) -> &'static str {
        match self {
            Self::Process => JobStatus::QueuedProcessing.as_str(),
            Self::Convert => ConvertFormatStatus::QueuedConverting.as_str(),
        }
    }

    /// Status a unit falls to when the queue refuses it.
    ///
    /// Jobs become `error-processing` and wait for a user retry. Merged
    /// formats go back to `waiting-to-convert` and the sweeper re-offers them.
    pub fn rejected_status(&self) -> &'static str {
        match self {
            Self::Process => JobStatus::ErrorProcessing.as_str(),
            Self::Convert => ConvertFormatStatus::WaitingToConvert.as_str(),
        }
    }

    pub fn queue(&self) -> QueueName {
        match self {
            Self::Process => QueueName::Process,
            Self::Convert => QueueName::Convert,
        }
    }
}
