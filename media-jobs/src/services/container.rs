//! Service container for dependency injection.
//!
//! Builds the repositories and pipeline services over one database and one
//! queue gateway, and owns the sweeper task's lifecycle.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{AppConfig, QueueBackend};
use crate::database::repositories::{
    AdmissionRepository, FormatRepository, JobRepository, SqlxAdmissionRepository,
    SqlxFormatRepository, SqlxJobRepository,
};
use crate::database::{DbPool, WritePool};
use crate::pipeline::{
    AdmissionController, BestAudioMatcher, ConvertService, DownloadService, JobService,
    RetryHandler, StatusReconciler, Sweeper, SweeperHandle,
};
use crate::queue::{MemoryQueue, QueueGateway, SqliteQueue};

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ServiceContainer {
    pub pool: DbPool,
    pub write_pool: WritePool,
    pub queue: Arc<dyn QueueGateway>,
    pub admission: Arc<AdmissionController>,
    pub reconciler: Arc<StatusReconciler>,
    pub retry: Arc<RetryHandler>,
    pub jobs: Arc<JobService>,
    pub converts: Arc<ConvertService>,
    pub downloads: Arc<DownloadService>,
    pub sweeper: Arc<Sweeper>,
    sweeper_task: Mutex<Option<JoinHandle<()>>>,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Build the container with the queue backend selected in `config`.
    pub fn new(config: &AppConfig, pool: DbPool, write_pool: WritePool) -> Self {
        let queue: Arc<dyn QueueGateway> = match config.queue_backend {
            QueueBackend::Sqlite => Arc::new(SqliteQueue::new(write_pool.clone())),
            QueueBackend::Memory => Arc::new(MemoryQueue::new()),
        };
        Self::with_queue(
            pool,
            write_pool,
            queue,
            config.max_concurrent_jobs,
            config.sweep_interval,
        )
    }

    pub fn with_queue(
        pool: DbPool,
        write_pool: WritePool,
        queue: Arc<dyn QueueGateway>,
        max_concurrent: u64,
        sweep_interval: Duration,
    ) -> Self {
        let job_repo: Arc<dyn JobRepository> =
            Arc::new(SqlxJobRepository::new(pool.clone(), write_pool.clone()));
        let format_repo: Arc<dyn FormatRepository> =
            Arc::new(SqlxFormatRepository::new(pool.clone(), write_pool.clone()));
        let admission_repo: Arc<dyn AdmissionRepository> =
            Arc::new(SqlxAdmissionRepository::new(write_pool.clone()));

        let sweeper_handle = SweeperHandle::new();
        let admission = Arc::new(AdmissionController::new(
            admission_repo,
            queue.clone(),
            max_concurrent,
        ));
        let reconciler = Arc::new(StatusReconciler::new(
            job_repo.clone(),
            format_repo.clone(),
            sweeper_handle.clone(),
        ));
        let retry = Arc::new(RetryHandler::new(
            job_repo.clone(),
            admission.clone(),
            sweeper_handle.clone(),
        ));
        let jobs = Arc::new(JobService::new(
            job_repo.clone(),
            format_repo.clone(),
            admission.clone(),
        ));
        let converts = Arc::new(ConvertService::new(
            job_repo.clone(),
            format_repo.clone(),
            admission.clone(),
            Arc::new(BestAudioMatcher),
        ));
        let downloads = Arc::new(DownloadService::new(format_repo.clone(), queue.clone()));
        let sweeper = Arc::new(Sweeper::new(
            job_repo,
            format_repo,
            admission.clone(),
            sweeper_handle,
            sweep_interval,
        ));

        Self {
            pool,
            write_pool,
            queue,
            admission,
            reconciler,
            retry,
            jobs,
            converts,
            downloads,
            sweeper,
            sweeper_task: Mutex::new(None),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start the sweeper loop. Calling it again is a no-op.
    pub fn start_background_tasks(&self) {
        let mut task = self.sweeper_task.lock();
        if task.is_none() {
            *task = Some(
                self.sweeper
                    .clone()
                    .start(self.cancellation_token.child_token()),
            );
        }
    }

    /// Stop background tasks and close the pools.
    pub async fn shutdown(&self) {
        info!("Shutting down services");
        self.cancellation_token.cancel();

        let task = self.sweeper_task.lock().take();
        if let Some(task) = task
            && tokio::time::timeout(DEFAULT_SHUTDOWN_TIMEOUT, task).await.is_err()
        {
            warn!("Sweeper did not stop within {:?}", DEFAULT_SHUTDOWN_TIMEOUT);
        }

        self.write_pool.close().await;
        self.pool.close().await;
        info!("Services shut down");
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }
}
