//! Admission under the shared concurrency ceiling.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::models::Stage;
use crate::database::repositories::AdmissionRepository;
use crate::queue::{EnqueueReport, QueueGateway};
use crate::{Error, Result};

/// Slots granted by one admission attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    /// Units in flight when the attempt was made.
    pub in_flight: u64,
    /// Free slots when the attempt was made.
    pub available: u64,
    /// IDs now holding a slot, in candidate order.
    pub admitted: Vec<String>,
    /// Candidates that had already left the pending status.
    pub skipped: Vec<String>,
}

/// Admission followed by the enqueue call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub in_flight: u64,
    pub available: u64,
    /// IDs the queue accepted.
    pub enqueued: Vec<String>,
    /// IDs the queue refused, moved to the stage's rejected status.
    pub rejected: Vec<String>,
    pub skipped: Vec<String>,
}

impl DispatchReport {
    /// Nothing was sent because every slot was taken.
    pub fn saturated(&self) -> bool {
        self.available == 0
    }
}

/// Moves pending units into the queued status without ever letting the sum of
/// queued and running units across stages exceed `max_concurrent`.
pub struct AdmissionController {
    repo: Arc<dyn AdmissionRepository>,
    queue: Arc<dyn QueueGateway>,
    max_concurrent: u64,
}

impl AdmissionController {
    pub fn new(
        repo: Arc<dyn AdmissionRepository>,
        queue: Arc<dyn QueueGateway>,
        max_concurrent: u64,
    ) -> Self {
        Self {
            repo,
            queue,
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> u64 {
        self.max_concurrent
    }

    pub async fn in_flight(&self) -> Result<u64> {
        self.repo.count_in_flight().await
    }

    /// Reserve slots for up to the free capacity of `candidates`, in order.
    pub async fn admit(&self, stage: Stage, candidates: &[String]) -> Result<Admission> {
        if candidates.is_empty() {
            return Ok(Admission::default());
        }

        let reservation = self
            .repo
            .reserve(stage, candidates, self.max_concurrent)
            .await?;

        debug!(
            stage = %stage,
            in_flight = reservation.in_flight,
            available = reservation.available,
            admitted = reservation.reserved.len(),
            skipped = reservation.skipped.len(),
            "Admission attempt"
        );

        Ok(Admission {
            in_flight: reservation.in_flight,
            available: reservation.available,
            admitted: reservation.reserved,
            skipped: reservation.skipped,
        })
    }

    /// Admit `candidates` and hand the admitted IDs to the stage's queue.
    ///
    /// IDs the queue refuses move to the stage's rejected status. If the queue
    /// cannot be reached at all, the reservations are released and the error
    /// is returned.
    pub async fn dispatch(&self, stage: Stage, candidates: &[String]) -> Result<DispatchReport> {
        let admission = self.admit(stage, candidates).await?;
        let mut report = DispatchReport {
            in_flight: admission.in_flight,
            available: admission.available,
            skipped: admission.skipped,
            ..Default::default()
        };
        if admission.admitted.is_empty() {
            return Ok(report);
        }

        let outcomes = match self.queue.enqueue(stage.queue(), &admission.admitted).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(
                    stage = %stage,
                    count = admission.admitted.len(),
                    "Queue unavailable, releasing reserved slots: {}",
                    e
                );
                if let Err(release_err) = self.repo.release(stage, &admission.admitted).await {
                    warn!("Failed to release reserved slots: {}", release_err);
                }
                return Err(Error::Queue(e));
            }
        };

        let enqueue = EnqueueReport::from_outcomes(&admission.admitted, outcomes);
        if !enqueue.failed.is_empty() {
            for (id, reason) in &enqueue.failed {
                warn!(stage = %stage, id = %id, "Queue rejected message: {}", reason);
            }
            report.rejected = self.repo.reject(stage, &enqueue.failed_ids()).await?;
        }
        report.enqueued = enqueue.accepted;

        if !report.enqueued.is_empty() {
            info!(
                stage = %stage,
                enqueued = report.enqueued.len(),
                rejected = report.rejected.len(),
                "Dispatched to {} queue",
                stage.queue()
            );
        }
        Ok(report)
    }
}
