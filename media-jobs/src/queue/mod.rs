//! Work queue gateway.
//!
//! The controller hands opaque IDs to a delivery-at-least-once queue and only
//! needs a per-ID accepted/failed answer back. A failure of the whole call
//! (the queue cannot be reached at all) is reported as a [`QueueError`].

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub use memory::MemoryQueue;
pub use sqlite::{QueueMessage, SqliteQueue};

/// Longest message body a queue accepts.
pub const MAX_MESSAGE_BODY_BYTES: usize = 256;

/// The queues fed by the controller.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    /// Job IDs for the inspection worker.
    Process,
    /// Merged format IDs for the transcoder.
    Convert,
    /// Format IDs for the downloader.
    Download,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Convert => "convert",
            Self::Download => "download",
        }
    }
}

/// Result of submitting one ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted { id: String },
    Failed { id: String, reason: String },
}

impl EnqueueOutcome {
    pub fn id(&self) -> &str {
        match self {
            Self::Accepted { id } | Self::Failed { id, .. } => id,
        }
    }
}

/// Total transport failure. Per-ID rejections are not errors.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue '{queue}' unavailable: {reason}")]
    Unavailable { queue: QueueName, reason: String },
}

/// Batch submit of opaque IDs.
#[async_trait]
pub trait QueueGateway: Send + Sync {
    /// Submit `ids` to `queue`. Must return one outcome per input ID and must
    /// not fail for partial rejections.
    async fn enqueue(
        &self,
        queue: QueueName,
        ids: &[String],
    ) -> Result<Vec<EnqueueOutcome>, QueueError>;
}

/// Accepted/failed split of an enqueue call, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueReport {
    pub accepted: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl EnqueueReport {
    /// Match gateway outcomes against the submitted IDs. An ID the gateway
    /// reported nothing for counts as failed.
    pub fn from_outcomes(ids: &[String], outcomes: Vec<EnqueueOutcome>) -> Self {
        let mut by_id: HashMap<String, EnqueueOutcome> = outcomes
            .into_iter()
            .map(|outcome| (outcome.id().to_string(), outcome))
            .collect();

        let mut report = Self::default();
        for id in ids {
            match by_id.remove(id) {
                Some(EnqueueOutcome::Accepted { .. }) => report.accepted.push(id.clone()),
                Some(EnqueueOutcome::Failed { reason, .. }) => {
                    report.failed.push((id.clone(), reason))
                }
                None => report
                    .failed
                    .push((id.clone(), "no outcome reported by queue".to_string())),
            }
        }
        report
    }

    pub fn failed_ids(&self) -> Vec<String> {
        self.failed.iter().map(|(id, _)| id.clone()).collect()
    }
}

/// Per-ID validation shared by the backends.
pub(crate) fn validate_body(id: &str) -> Result<(), String> {
    if id.trim().is_empty() {
        return Err("empty message body".to_string());
    }
    if id.len() > MAX_MESSAGE_BODY_BYTES {
        return Err(format!(
            "message body exceeds {} bytes",
            MAX_MESSAGE_BODY_BYTES
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_keeps_input_order_and_flags_missing() {
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let outcomes = vec![
            EnqueueOutcome::Failed {
                id: "b".to_string(),
                reason: "throttled".to_string(),
            },
            EnqueueOutcome::Accepted {
                id: "a".to_string(),
            },
        ];

        let report = EnqueueReport::from_outcomes(&ids, outcomes);
        assert_eq!(report.accepted, vec!["a".to_string()]);
        assert_eq!(report.failed_ids(), vec!["b".to_string(), "c".to_string()]);
        assert_eq!(report.failed[0].1, "throttled");
    }

    #[test]
    fn test_validate_body() {
        assert!(validate_body("0b7c").is_ok());
        assert!(validate_body("  ").is_err());
        assert!(validate_body(&"x".repeat(MAX_MESSAGE_BODY_BYTES + 1)).is_err());
    }

    #[test]
    fn test_queue_name_strings() {
        assert_eq!(QueueName::Convert.to_string(), "convert");
        assert_eq!("download".parse::<QueueName>().unwrap(), QueueName::Download);
    }
}
