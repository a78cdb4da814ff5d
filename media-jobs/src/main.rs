use std::sync::Arc;
use tracing::{error, info};

use media_jobs::api::{ApiServer, AppState};
use media_jobs::config::AppConfig;
use media_jobs::database;
use media_jobs::logging::init_logging;
use media_jobs::services::ServiceContainer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env_or_default();

    // Keep the guard alive so the file writer flushes on exit
    let (logging_config, _log_guard) = init_logging(config.log_dir.as_deref())?;

    info!(
        database_url = %config.database_url,
        max_concurrent = config.max_concurrent_jobs,
        queue_backend = %config.queue_backend,
        "Starting media-jobs v{}",
        env!("CARGO_PKG_VERSION")
    );

    let (pool, write_pool) = database::connect(&config.database_url).await?;
    let services = Arc::new(ServiceContainer::new(&config, pool, write_pool));
    services.start_background_tasks();
    logging_config.start_retention_cleanup(services.cancellation_token());

    let state = AppState::new(services.clone()).with_logging_config(logging_config);
    let server = Arc::new(ApiServer::new(config.api.clone(), state));

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal_server.shutdown();
    });

    let result = server.run().await;
    services.shutdown().await;
    result?;

    info!("media-jobs stopped");
    Ok(())
}
