//! Periodic admission of waiting work.
//!
//! Each pass offers waiting jobs first, then waiting merged formats, each in
//! creation order, to whatever capacity the shared ceiling has left. Passes
//! run on a fixed interval and can be requested early through a
//! [`SweeperHandle`].

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::admission::AdmissionController;
use crate::database::models::Stage;
use crate::database::repositories::{FormatRepository, JobRepository};
use crate::Result;

/// Wakes the sweeper before its next tick.
#[derive(Clone, Default)]
pub struct SweeperHandle {
    notify: Arc<Notify>,
}

impl SweeperHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a pass. Requests made while a pass runs coalesce into one.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    async fn triggered(&self) {
        self.notify.notified().await;
    }
}

/// Counts from one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub jobs_admitted: usize,
    pub converts_admitted: usize,
    pub rejected: usize,
}

pub struct Sweeper {
    jobs: Arc<dyn JobRepository>,
    formats: Arc<dyn FormatRepository>,
    admission: Arc<AdmissionController>,
    handle: SweeperHandle,
    period: Duration,
}

impl Sweeper {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        formats: Arc<dyn FormatRepository>,
        admission: Arc<AdmissionController>,
        handle: SweeperHandle,
        period: Duration,
    ) -> Self {
        Self {
            jobs,
            formats,
            admission,
            handle,
            period,
        }
    }

    pub fn handle(&self) -> SweeperHandle {
        self.handle.clone()
    }

    /// One pass: admit waiting jobs, then waiting conversions.
    ///
    /// Running with nothing waiting, or with no free capacity, changes nothing.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        let waiting_jobs = self.jobs.list_waiting_job_ids().await?;
        if !waiting_jobs.is_empty() {
            let dispatched = self.admission.dispatch(Stage::Process, &waiting_jobs).await?;
            report.jobs_admitted = dispatched.enqueued.len();
            report.rejected += dispatched.rejected.len();
        }

        let waiting_converts = self.formats.list_waiting_merged_ids().await?;
        if !waiting_converts.is_empty() {
            let dispatched = self
                .admission
                .dispatch(Stage::Convert, &waiting_converts)
                .await?;
            report.converts_admitted = dispatched.enqueued.len();
            report.rejected += dispatched.rejected.len();
        }

        Ok(report)
    }

    /// Spawn the sweep loop. It stops when `cancellation_token` fires.
    pub fn start(
        self: Arc<Self>,
        cancellation_token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!("Sweeper started (interval: {}s)", self.period.as_secs());

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {}
                    _ = self.handle.triggered() => {
                        debug!("Sweep requested");
                    }
                }

                match self.sweep_once().await {
                    Ok(report) => {
                        if report != SweepReport::default() {
                            info!(
                                jobs = report.jobs_admitted,
                                converts = report.converts_admitted,
                                rejected = report.rejected,
                                "Sweep admitted waiting work"
                            );
                        }
                    }
                    Err(e) => error!("Sweep failed: {}", e),
                }
            }
        })
    }
}
